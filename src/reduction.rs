//! Tree reduction over chunked arrays
//!
//! A reduction is built in three phases, each producing a new
//! [`ChunkedArray`] whose graph extends the previous one:
//!
//! 1. [`map_chunks`] applies the chunk function to every block,
//! 2. [`partial_reduce`] merges groups of at most `fan_in` neighbouring
//!    blocks per reduced axis, repeated `depth - 1` times with the combine
//!    function,
//! 3. a last [`partial_reduce`] with the aggregate function produces the
//!    result with the caller's element type and dimension policy.
//!
//! Nothing is evaluated here; see [`crate::parallel::Executor`].

use crate::array::{ChunkedArray, Chunks};
use crate::block::DType;
use crate::errors::{ReductionError, Result};
use crate::graph::{block_indices, cartesian, tokenize, Layer, Task};
use crate::plan::{Axes, AxisSet, FanIn, FanInMap, ReductionPlan};
use crate::statistics::BlockFn;
use log::debug;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

/// Apply `func` to every block, shrinking the reduced axes to size 1
///
/// The block layout is unchanged apart from the reduced axes, whose block
/// sizes all become 1.
///
/// # Errors
///
/// Returns an error if an axis in `axes` is outside the array.
pub fn map_chunks(x: &ChunkedArray, func: BlockFn, axes: &AxisSet) -> Result<ChunkedArray> {
    let ndim = x.ndim();
    if let Some(axis) = axes.iter().find(|&axis| axis >= ndim) {
        return Err(ReductionError::InvalidAxis {
            axis: isize::try_from(axis).unwrap_or(isize::MAX),
            ndim,
            reason: "out of range",
        });
    }

    let name: Arc<str> = Arc::from(format!(
        "{}-{}",
        func.label(),
        tokenize(&(func, x.name(), axes))
    ));
    let tasks: BTreeMap<Vec<usize>, Task> = block_indices(&x.numblocks())
        .into_iter()
        .map(|index| {
            let input = x.key(index.clone());
            let task = Task::Apply {
                func,
                axes: axes.clone(),
                keepdims: true,
                inputs: vec![input],
                grid: vec![1; ndim],
            };
            (index, task)
        })
        .collect();

    let sizes = (0..ndim)
        .map(|axis| {
            let sizes = x.chunks().axis(axis);
            if axes.contains(axis) {
                vec![1; sizes.len()]
            } else {
                sizes.to_vec()
            }
        })
        .collect();

    debug!("layer '{name}': {} chunk tasks", tasks.len());
    let graph = x.graph().with_layer(Layer::new(Arc::clone(&name), tasks));
    ChunkedArray::new(graph, name, Chunks::new(sizes)?, None)
}

/// Merge groups of neighbouring blocks along the axes of `fan_in`
///
/// Each axis in `fan_in` is split into consecutive groups of at most
/// `fan_in[axis]` blocks; all other axes keep their blocks. Every output
/// block concatenates its group and applies `func`. Reduced axes of the
/// inputs are expected to have size 1 already, so each group yields a
/// size-1 block. With `keepdims` false the reduced axes are dropped, which
/// requires each of them to form a single group.
///
/// `name` is a prefix for the output layer; a content token is always
/// appended.
///
/// # Errors
///
/// Returns [`ReductionError::InvalidFanIn`] for a fan-in below one,
/// [`ReductionError::InvalidAxis`] for an axis outside the array, and
/// [`ReductionError::ChunkMismatch`] when dropping an axis that still has
/// more than one group.
pub fn partial_reduce(
    func: BlockFn,
    x: &ChunkedArray,
    fan_in: &FanInMap,
    keepdims: bool,
    dtype: Option<DType>,
    name: Option<&str>,
) -> Result<ChunkedArray> {
    let ndim = x.ndim();
    let numblocks = x.numblocks();
    for (&axis, &f) in fan_in {
        if axis >= ndim {
            return Err(ReductionError::InvalidAxis {
                axis: isize::try_from(axis).unwrap_or(isize::MAX),
                ndim,
                reason: "out of range",
            });
        }
        if f < 1 {
            return Err(ReductionError::InvalidFanIn {
                axis: Some(axis),
                fan_in: f,
            });
        }
    }

    let groups: Vec<Vec<Range<usize>>> = numblocks
        .iter()
        .enumerate()
        .map(|(axis, &n)| match fan_in.get(&axis) {
            Some(&f) => (0..n)
                .step_by(f)
                .map(|start| start..n.min(start.saturating_add(f)))
                .collect(),
            None => (0..n).map(|i| i..i + 1).collect(),
        })
        .collect();

    if !keepdims {
        if let Some((&axis, _)) = fan_in.iter().find(|&(&axis, _)| groups[axis].len() > 1) {
            return Err(ReductionError::ChunkMismatch {
                message: format!(
                    "cannot drop axis {axis}: it still has {} groups",
                    groups[axis].len()
                ),
            });
        }
    }

    let axes = AxisSet::from(fan_in);
    let prefix = name.map_or_else(|| func.label(), str::to_string);
    let name: Arc<str> = Arc::from(format!(
        "{prefix}-{}",
        tokenize(&(func, x.name(), fan_in, keepdims, dtype))
    ));

    let group_counts: Vec<Range<usize>> = groups.iter().map(|g| 0..g.len()).collect();
    let mut tasks = BTreeMap::new();
    for group in cartesian(&group_counts) {
        let spans: Vec<Range<usize>> = group
            .iter()
            .enumerate()
            .map(|(axis, &g)| groups[axis][g].clone())
            .collect();
        let inputs = cartesian(&spans)
            .into_iter()
            .map(|index| x.key(index))
            .collect();
        let grid = spans.iter().map(ExactSizeIterator::len).collect();
        let index: Vec<usize> = if keepdims {
            group
        } else {
            group
                .into_iter()
                .enumerate()
                .filter(|(axis, _)| !fan_in.contains_key(axis))
                .map(|(_, g)| g)
                .collect()
        };
        tasks.insert(
            index,
            Task::Apply {
                func,
                axes: axes.clone(),
                keepdims,
                inputs,
                grid,
            },
        );
    }

    let sizes: Vec<Vec<usize>> = (0..ndim)
        .filter(|axis| keepdims || !fan_in.contains_key(axis))
        .map(|axis| {
            if fan_in.contains_key(&axis) {
                vec![1; groups[axis].len()]
            } else {
                x.chunks().axis(axis).to_vec()
            }
        })
        .collect();

    debug!(
        "layer '{name}': {} tasks merging {:?} blocks with fan-in {fan_in:?}",
        tasks.len(),
        numblocks
    );
    let graph = x.graph().with_layer(Layer::new(Arc::clone(&name), tasks));
    ChunkedArray::new(graph, name, Chunks::new(sizes)?, dtype)
}

/// Plan and build a complete tree reduction
///
/// `combine` defaults to `aggregate`. The result carries `dtype`; every
/// intermediate level is untyped.
///
/// # Errors
///
/// Returns an error if `axes` or `fan_in` are invalid for `x`.
#[allow(clippy::too_many_arguments)]
pub fn reduction(
    x: &ChunkedArray,
    chunk: BlockFn,
    aggregate: BlockFn,
    axes: &Axes,
    keepdims: bool,
    dtype: DType,
    fan_in: &FanIn,
    combine: Option<BlockFn>,
) -> Result<ChunkedArray> {
    let plan = ReductionPlan::new(axes, &x.numblocks(), fan_in)?;
    let combine = combine.unwrap_or(aggregate);

    let mut level = map_chunks(x, chunk, &plan.axes)?;
    for _ in 1..plan.depth {
        let prefix = format!("{}-partial", combine.label());
        level = partial_reduce(combine, &level, &plan.fan_in, true, None, Some(&prefix))?;
    }

    let prefix = format!("{}-aggregate", aggregate.label());
    let final_fan_in = plan.final_fan_in(&level.numblocks());
    let result = partial_reduce(
        aggregate,
        &level,
        &final_fan_in,
        keepdims,
        Some(dtype),
        Some(&prefix),
    )?;
    debug!(
        "reduction '{}' built: {} levels, {} layers",
        result.name(),
        plan.depth,
        result.graph().num_layers()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Primitive;
    use ndarray::{Array, IxDyn};

    fn grid_array() -> ChunkedArray {
        let data = Array::from_shape_fn(IxDyn(&[4, 6]), |ix| (ix[0] * 6 + ix[1]) as f64);
        ChunkedArray::from_array(data, Chunks::regular(&[4, 6], &[2, 3]).unwrap()).unwrap()
    }

    #[test]
    fn map_chunks_shrinks_reduced_axes_only() {
        let x = grid_array();
        let axes = Axes::One(1).normalize(2).unwrap();
        let mapped = map_chunks(&x, BlockFn::Primitive(Primitive::Sum), &axes).unwrap();
        assert_eq!(mapped.chunks().as_slice(), &[vec![2, 2], vec![1, 1]]);
        assert_eq!(mapped.graph().num_layers(), 2);
    }

    #[test]
    fn partial_reduce_groups_ragged_tails() {
        let data = Array::from_shape_fn(IxDyn(&[5]), |ix| ix[0] as f64);
        let x = ChunkedArray::from_array(data, Chunks::regular(&[5], &[1]).unwrap()).unwrap();
        let fan_in: FanInMap = [(0, 2)].into_iter().collect();
        let sum = BlockFn::Primitive(Primitive::Sum);
        let level = partial_reduce(sum, &x, &fan_in, true, None, None).unwrap();
        assert_eq!(level.chunks().as_slice(), &[vec![1, 1, 1]]);
        assert!(level.name().starts_with("sum-"));
    }

    #[test]
    fn dropping_an_axis_with_several_groups_fails() {
        let x = grid_array();
        let fan_in: FanInMap = [(1, 1)].into_iter().collect();
        let sum = BlockFn::Primitive(Primitive::Sum);
        assert!(matches!(
            partial_reduce(sum, &x, &fan_in, false, None, None),
            Err(ReductionError::ChunkMismatch { .. })
        ));
    }
}
