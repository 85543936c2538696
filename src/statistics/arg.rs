//! Argmin and argmax with global index tracking
//!
//! A record stores, per position, the winning value, its index along the
//! reduced axis within the record's span, and the span's length. Merging
//! picks the winning record and shifts its index by the lengths of the
//! records before it.

use super::Combinable;
use crate::block::{ArgRecord, Block};
use crate::errors::{ReductionError, Result};
use crate::plan::AxisSet;
use crate::primitives::{BlockPrimitives, Extreme, NanPolicy};
use ndarray::{Array, ArrayD, Axis, Dimension};

/// Index of the first minimum or maximum along exactly one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArgReduction {
    extreme: Extreme,
    nan: NanPolicy,
}

impl ArgReduction {
    #[must_use]
    pub const fn new(extreme: Extreme, nan: NanPolicy) -> Self {
        Self { extreme, nan }
    }

    #[must_use]
    pub const fn extreme(&self) -> Extreme {
        self.extreme
    }

    #[must_use]
    pub const fn nan_policy(&self) -> NanPolicy {
        self.nan
    }

    pub(crate) const fn label(&self) -> &'static str {
        match (self.extreme, self.nan) {
            (Extreme::Min, NanPolicy::Propagate) => "argmin",
            (Extreme::Max, NanPolicy::Propagate) => "argmax",
            (Extreme::Min, NanPolicy::Skip) => "nanargmin",
            (Extreme::Max, NanPolicy::Skip) => "nanargmax",
        }
    }

    fn merge(
        &self,
        block: &Block,
        axes: &AxisSet,
        primitives: &dyn BlockPrimitives,
    ) -> Result<ArgRecord> {
        let axis = single_axis(axes, block.ndim())?;
        let record = match block {
            Block::Arg(record) => record,
            other => {
                return Err(ReductionError::type_mismatch(
                    "arg combine",
                    "arg record",
                    other.kind(),
                ))
            }
        };

        let (value, winner) = primitives.arg_extreme(self.extreme, self.nan, &record.value, axis)?;

        // Exclusive prefix sum of span lengths: where each record starts
        let mut offsets = record.n.clone();
        for mut lane in offsets.lanes_mut(Axis(axis)) {
            let mut start = 0;
            for n in lane.iter_mut() {
                let len = *n;
                *n = start;
                start += len;
            }
        }

        let index = Array::from_shape_fn(winner.raw_dim(), |position| {
            let chosen = winner[position.slice()];
            let Ok(group) = usize::try_from(chosen) else {
                return -1;
            };
            let mut source = position.slice().to_vec();
            source[axis] = group;
            let local = record.index[source.as_slice()];
            if local < 0 {
                -1
            } else {
                offsets[source.as_slice()] + local
            }
        });

        let n = record.n.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        Ok(ArgRecord { value, index, n })
    }
}

impl Combinable for ArgReduction {
    fn chunk(
        &self,
        block: &Block,
        axes: &AxisSet,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block> {
        let axis = single_axis(axes, block.ndim())?;
        let data = block.to_float()?;
        let span = i64::try_from(data.shape()[axis]).unwrap_or(i64::MAX);
        let (value, index) = primitives.arg_extreme(self.extreme, self.nan, &data, axis)?;
        let n = ArrayD::from_elem(value.raw_dim(), span);
        Ok(Block::Arg(ArgRecord { value, index, n }))
    }

    fn combine(
        &self,
        block: &Block,
        axes: &AxisSet,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block> {
        self.merge(block, axes, primitives).map(Block::Arg)
    }

    fn aggregate(
        &self,
        block: &Block,
        axes: &AxisSet,
        keepdims: bool,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block> {
        let merged = Block::Int(self.merge(block, axes, primitives)?.index);
        Ok(if keepdims {
            merged
        } else {
            merged.remove_axes(axes.as_slice())
        })
    }
}

fn single_axis(axes: &AxisSet, ndim: usize) -> Result<usize> {
    axes.single().ok_or_else(|| ReductionError::InvalidAxis {
        axis: axes
            .iter()
            .next()
            .map_or(-1, |axis| isize::try_from(axis).unwrap_or(isize::MAX)),
        ndim,
        reason: "arg reductions take exactly one axis",
    })
}
