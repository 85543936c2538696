//! Layered task graphs
//!
//! A [`TaskGraph`] maps block keys to the computations that produce them. It
//! is stored as a set of named [`Layer`]s, one per chunked array, so that a
//! new tree level only adds its own layer and shares every ancestor by `Arc`.
//! Layer names are content-derived (see [`tokenize`]), which makes
//! [`TaskGraph::union`] idempotent for identical content.

use crate::block::Block;
use crate::errors::{ReductionError, Result};
use crate::plan::AxisSet;
use crate::primitives::ElementwiseOp;
use crate::statistics::BlockFn;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

/// Deterministic content hash used to name graph layers
///
/// `DefaultHasher::new()` is keyed with fixed constants, so equal inputs give
/// equal tokens on every run of the same build.
pub fn tokenize<T: Hash + ?Sized>(value: &T) -> String {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Address of one block: layer name plus per-axis block index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub name: Arc<str>,
    pub index: Vec<usize>,
}

impl Key {
    #[must_use]
    pub fn new(name: &Arc<str>, index: Vec<usize>) -> Self {
        Self {
            name: Arc::clone(name),
            index,
        }
    }
}

/// Computation producing one block
#[derive(Debug, Clone)]
pub enum Task {
    /// Block data supplied up front
    Literal(Arc<Block>),

    /// Concatenate `inputs` (a row-major grid of shape `grid`) along `axes`
    /// and apply `func`
    Apply {
        func: BlockFn,
        axes: AxisSet,
        keepdims: bool,
        inputs: Vec<Key>,
        grid: Vec<usize>,
    },

    /// Apply an elementwise transform to a single block
    Elementwise { op: ElementwiseOp, input: Key },
}

impl Task {
    /// Keys this task reads
    pub fn inputs(&self) -> &[Key] {
        match self {
            Self::Literal(_) => &[],
            Self::Apply { inputs, .. } => inputs,
            Self::Elementwise { input, .. } => std::slice::from_ref(input),
        }
    }
}

/// Tasks of one chunked array, keyed by block index
#[derive(Debug, Clone)]
pub struct Layer {
    name: Arc<str>,
    tasks: BTreeMap<Vec<usize>, Task>,
}

impl Layer {
    #[must_use]
    pub fn new(name: Arc<str>, tasks: BTreeMap<Vec<usize>, Task>) -> Self {
        Self { name, tasks }
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn tasks(&self) -> &BTreeMap<Vec<usize>, Task> {
        &self.tasks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Names of the layers this layer reads from
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<Arc<str>> {
        self.tasks
            .values()
            .flat_map(Task::inputs)
            .map(|key| Arc::clone(&key.name))
            .collect()
    }
}

/// Immutable graph of named layers
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    layers: BTreeMap<Arc<str>, Arc<Layer>>,
}

impl TaskGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph holding a single layer
    #[must_use]
    pub fn from_layer(layer: Layer) -> Self {
        Self::new().with_layer(layer)
    }

    /// Copy of this graph with `layer` added
    #[must_use]
    pub fn with_layer(&self, layer: Layer) -> Self {
        let mut layers = self.layers.clone();
        layers.insert(Arc::clone(&layer.name), Arc::new(layer));
        Self { layers }
    }

    /// Union of two graphs; layers with equal names are equal by construction
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut layers = self.layers.clone();
        for (name, layer) in &other.layers {
            layers
                .entry(Arc::clone(name))
                .or_insert_with(|| Arc::clone(layer));
        }
        Self { layers }
    }

    #[must_use]
    pub fn layer(&self, name: &str) -> Option<&Arc<Layer>> {
        self.layers.get(name)
    }

    #[must_use]
    pub fn get(&self, key: &Key) -> Option<&Task> {
        self.layers.get(&key.name)?.tasks.get(&key.index)
    }

    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn num_tasks(&self) -> usize {
        self.layers.values().map(|layer| layer.len()).sum()
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(|name| &**name)
    }

    /// Layers needed to compute `name`, dependencies first
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::MissingTask`] if a referenced layer is absent.
    pub fn execution_order(&self, name: &str) -> Result<Vec<Arc<Layer>>> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        self.visit(name, &mut visited, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        visited: &mut HashSet<Arc<str>>,
        order: &mut Vec<Arc<Layer>>,
    ) -> Result<()> {
        if visited.contains(name) {
            return Ok(());
        }
        let layer = self
            .layers
            .get(name)
            .ok_or_else(|| ReductionError::MissingTask {
                name: name.to_string(),
                index: Vec::new(),
            })?;
        visited.insert(Arc::clone(&layer.name));
        for dependency in layer.dependencies() {
            self.visit(&dependency, visited, order)?;
        }
        order.push(Arc::clone(layer));
        Ok(())
    }
}

/// Row-major cartesian product of per-axis index ranges
pub(crate) fn cartesian(ranges: &[Range<usize>]) -> Vec<Vec<usize>> {
    ranges.iter().fold(vec![Vec::new()], |acc, range| {
        acc.into_iter()
            .flat_map(|prefix| {
                range.clone().map(move |i| {
                    let mut index = prefix.clone();
                    index.push(i);
                    index
                })
            })
            .collect()
    })
}

/// Every block index of a grid with `numblocks` blocks per axis
pub(crate) fn block_indices(numblocks: &[usize]) -> Vec<Vec<usize>> {
    let ranges: Vec<Range<usize>> = numblocks.iter().map(|&n| 0..n).collect();
    cartesian(&ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn literal_layer(name: &str) -> Layer {
        let block = Block::Float(arr1(&[1.0]).into_dyn());
        let mut tasks = BTreeMap::new();
        tasks.insert(vec![0], Task::Literal(Arc::new(block)));
        Layer::new(Arc::from(name), tasks)
    }

    #[test]
    fn block_indices_are_row_major() {
        assert_eq!(
            block_indices(&[2, 2]),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
        assert_eq!(block_indices(&[]), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn tokens_are_deterministic() {
        assert_eq!(tokenize(&("sum", 3_usize)), tokenize(&("sum", 3_usize)));
        assert_ne!(tokenize(&("sum", 3_usize)), tokenize(&("sum", 4_usize)));
    }

    #[test]
    fn union_is_idempotent() {
        let graph = TaskGraph::from_layer(literal_layer("a"));
        let merged = graph.union(&graph);
        assert_eq!(merged.num_layers(), 1);
        assert_eq!(merged.num_tasks(), 1);

        let other = TaskGraph::from_layer(literal_layer("b"));
        assert_eq!(graph.union(&other).num_layers(), 2);
    }

    #[test]
    fn missing_layers_are_reported() {
        let mut tasks = BTreeMap::new();
        tasks.insert(
            vec![0],
            Task::Elementwise {
                op: ElementwiseOp::Abs,
                input: Key::new(&Arc::from("absent"), vec![0]),
            },
        );
        let graph = TaskGraph::from_layer(Layer::new(Arc::from("abs"), tasks));
        assert!(matches!(
            graph.execution_order("abs"),
            Err(ReductionError::MissingTask { .. })
        ));
    }
}
