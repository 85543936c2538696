//! Chunked arrays
//!
//! A [`ChunkedArray`] pairs a chunk layout and element type with the task
//! graph that lazily produces its blocks. Arrays are immutable; every tree
//! level is a new array whose graph shares its ancestors' layers.

use crate::block::{Block, DType};
use crate::errors::{ReductionError, Result};
use crate::graph::{block_indices, tokenize, Key, Layer, Task, TaskGraph};
use crate::primitives::ElementwiseOp;
use ndarray::ArrayD;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

/// Per-axis sequence of block sizes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chunks(Vec<Vec<usize>>);

impl Chunks {
    /// Build a layout from explicit block sizes
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::ChunkMismatch`] if an axis has no blocks.
    pub fn new(sizes: Vec<Vec<usize>>) -> Result<Self> {
        if let Some(axis) = sizes.iter().position(Vec::is_empty) {
            return Err(ReductionError::ChunkMismatch {
                message: format!("axis {axis} has no blocks"),
            });
        }
        Ok(Self(sizes))
    }

    /// Split `shape` into blocks of `block_shape`, the last block per axis
    /// taking the remainder
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::ChunkMismatch`] if the ranks differ or a
    /// block size is zero on a non-empty axis.
    pub fn regular(shape: &[usize], block_shape: &[usize]) -> Result<Self> {
        if shape.len() != block_shape.len() {
            return Err(ReductionError::ChunkMismatch {
                message: format!(
                    "block shape {block_shape:?} does not match array shape {shape:?}"
                ),
            });
        }
        let sizes = shape
            .iter()
            .zip(block_shape)
            .map(|(&len, &block)| match (len, block) {
                (0, _) => Ok(vec![0]),
                (_, 0) => Err(ReductionError::ChunkMismatch {
                    message: "zero block size on a non-empty axis".to_string(),
                }),
                _ => Ok((0..len)
                    .step_by(block)
                    .map(|start| block.min(len - start))
                    .collect()),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(sizes))
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Block sizes along one axis
    #[must_use]
    pub fn axis(&self, axis: usize) -> &[usize] {
        &self.0[axis]
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Vec<usize>] {
        &self.0
    }

    /// Number of blocks along every axis
    #[must_use]
    pub fn numblocks(&self) -> Vec<usize> {
        self.0.iter().map(Vec::len).collect()
    }

    /// Total length along every axis
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.0.iter().map(|sizes| sizes.iter().sum()).collect()
    }

    /// Element ranges covered by the block at `index`
    fn ranges(&self, index: &[usize]) -> Vec<Range<usize>> {
        self.0
            .iter()
            .zip(index)
            .map(|(sizes, &i)| {
                let start: usize = sizes[..i].iter().sum();
                start..start + sizes[i]
            })
            .collect()
    }
}

/// Lazily computed, block-partitioned n-dimensional array
#[derive(Debug, Clone)]
pub struct ChunkedArray {
    name: Arc<str>,
    chunks: Chunks,
    dtype: Option<DType>,
    graph: TaskGraph,
}

impl ChunkedArray {
    /// Wrap the layer `name` of `graph`
    ///
    /// `dtype` is `None` for intermediate tree levels whose blocks hold
    /// statistic records rather than plain data.
    ///
    /// # Errors
    ///
    /// Returns an error if `graph` has no layer called `name`, or if that
    /// layer does not hold exactly one task per block of `chunks`.
    pub fn new(
        graph: TaskGraph,
        name: impl Into<Arc<str>>,
        chunks: Chunks,
        dtype: Option<DType>,
    ) -> Result<Self> {
        let name = name.into();
        let layer = graph
            .layer(&name)
            .ok_or_else(|| ReductionError::MissingTask {
                name: name.to_string(),
                index: Vec::new(),
            })?;
        let expected: usize = chunks.numblocks().iter().product();
        if layer.len() != expected {
            return Err(ReductionError::ChunkMismatch {
                message: format!(
                    "layer '{name}' has {} tasks but the layout has {expected} blocks",
                    layer.len()
                ),
            });
        }
        Ok(Self {
            name,
            chunks,
            dtype,
            graph,
        })
    }

    /// Partition an in-memory float array into literal blocks
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::ChunkMismatch`] if `chunks` does not cover
    /// the array's shape.
    pub fn from_array(data: ArrayD<f64>, chunks: Chunks) -> Result<Self> {
        Self::from_block(Block::Float(data), chunks)
    }

    /// Partition an in-memory block of plain data into literal blocks
    ///
    /// # Errors
    ///
    /// Returns an error if `block` is a statistic record or if `chunks` does
    /// not cover its shape.
    pub fn from_block(block: Block, chunks: Chunks) -> Result<Self> {
        let dtype = block.dtype().ok_or_else(|| {
            ReductionError::type_mismatch("from_block", "plain data", block.kind())
        })?;
        if chunks.shape() != block.shape() {
            return Err(ReductionError::ChunkMismatch {
                message: format!(
                    "chunks cover shape {:?} but the array has shape {:?}",
                    chunks.shape(),
                    block.shape()
                ),
            });
        }

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        block.hash_into(&mut hasher);
        chunks.hash(&mut hasher);
        let name: Arc<str> = Arc::from(format!("array-{:016x}", hasher.finish()));

        let mut tasks = BTreeMap::new();
        for index in block_indices(&chunks.numblocks()) {
            let part = block.slice(&chunks.ranges(&index))?;
            tasks.insert(index, Task::Literal(Arc::new(part)));
        }
        let graph = TaskGraph::from_layer(Layer::new(Arc::clone(&name), tasks));
        Self::new(graph, name, chunks, Some(dtype))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn chunks(&self) -> &Chunks {
        &self.chunks
    }

    #[must_use]
    pub fn numblocks(&self) -> Vec<usize> {
        self.chunks.numblocks()
    }

    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.chunks.shape()
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.chunks.ndim()
    }

    #[must_use]
    pub const fn dtype(&self) -> Option<DType> {
        self.dtype
    }

    #[must_use]
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Key of the block at `index` in this array's layer
    #[must_use]
    pub fn key(&self, index: Vec<usize>) -> Key {
        Key::new(&self.name, index)
    }

    /// Apply an elementwise transform to every block
    ///
    /// # Errors
    ///
    /// Propagates layout validation errors from [`ChunkedArray::new`].
    pub fn map_blocks(&self, op: ElementwiseOp, dtype: DType) -> Result<Self> {
        let label = match op {
            ElementwiseOp::Abs => "abs",
            ElementwiseOp::Pow(_) => "pow",
            ElementwiseOp::Sqrt => "sqrt",
        };
        let name: Arc<str> = Arc::from(format!(
            "{label}-{}",
            tokenize(&(op, &*self.name, dtype))
        ));
        let tasks = block_indices(&self.numblocks())
            .into_iter()
            .map(|index| {
                let input = self.key(index.clone());
                (index, Task::Elementwise { op, input })
            })
            .collect();
        let graph = self
            .graph
            .with_layer(Layer::new(Arc::clone(&name), tasks));
        Self::new(graph, name, self.chunks.clone(), Some(dtype))
    }

    /// Summary of the array and its graph for logging and debugging
    #[must_use]
    pub fn describe(&self) -> JsonValue {
        json!({
            "name": &*self.name,
            "dtype": self.dtype.map(DType::as_str),
            "shape": self.shape(),
            "chunks": self.chunks.as_slice(),
            "numblocks": self.numblocks(),
            "layers": self.graph.num_layers(),
            "tasks": self.graph.num_tasks(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    #[test]
    fn regular_chunks_take_the_remainder_last() {
        let chunks = Chunks::regular(&[8, 4], &[3, 4]).unwrap();
        assert_eq!(chunks.as_slice(), &[vec![3, 3, 2], vec![4]]);
        assert_eq!(chunks.numblocks(), vec![3, 1]);
        assert_eq!(chunks.shape(), vec![8, 4]);
    }

    #[test]
    fn from_array_names_are_content_derived() {
        let data = Array::from_shape_fn(IxDyn(&[4, 6]), |ix| (ix[0] * 6 + ix[1]) as f64);
        let chunks = Chunks::regular(&[4, 6], &[2, 3]).unwrap();
        let a = ChunkedArray::from_array(data.clone(), chunks.clone()).unwrap();
        let b = ChunkedArray::from_array(data, chunks).unwrap();
        assert_eq!(a.name(), b.name());
        assert_eq!(a.graph().num_tasks(), 4);
        assert_eq!(a.dtype(), Some(DType::Float64));
    }

    #[test]
    fn mismatched_chunks_are_rejected() {
        let data = ArrayD::<f64>::zeros(IxDyn(&[5]));
        let chunks = Chunks::new(vec![vec![2, 2]]).unwrap();
        assert!(matches!(
            ChunkedArray::from_array(data, chunks),
            Err(ReductionError::ChunkMismatch { .. })
        ));
    }
}
