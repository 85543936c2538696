//! Mean as a count/total record

use super::{reduce_float, Combinable};
use crate::block::{Block, MeanRecord};
use crate::errors::{ReductionError, Result};
use crate::plan::AxisSet;
use crate::primitives::{BlockPrimitives, NanPolicy};

/// Mean over the reduced axes
///
/// The counting and summing strategy is fixed per instance by its
/// [`NanPolicy`]: `Skip` counts and sums only non-NaN elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeanReduction {
    nan: NanPolicy,
}

impl MeanReduction {
    #[must_use]
    pub const fn new(nan: NanPolicy) -> Self {
        Self { nan }
    }

    #[must_use]
    pub const fn nan_policy(&self) -> NanPolicy {
        self.nan
    }

    pub(crate) const fn label(&self) -> &'static str {
        match self.nan {
            NanPolicy::Propagate => "mean",
            NanPolicy::Skip => "nanmean",
        }
    }

    fn merge(
        &self,
        block: &Block,
        axes: &AxisSet,
        primitives: &dyn BlockPrimitives,
    ) -> Result<MeanRecord> {
        let record = match block {
            Block::Mean(record) => record,
            other => {
                return Err(ReductionError::type_mismatch(
                    "mean combine",
                    "mean record",
                    other.kind(),
                ))
            }
        };
        let sum = self.nan.sum();
        Ok(MeanRecord {
            n: reduce_float(primitives, sum, &record.n, axes)?,
            total: reduce_float(primitives, sum, &record.total, axes)?,
        })
    }
}

impl Combinable for MeanReduction {
    fn chunk(
        &self,
        block: &Block,
        axes: &AxisSet,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block> {
        let n = primitives.count(block, axes.as_slice(), self.nan)?;
        let total = reduce_float(primitives, self.nan.sum(), &block.to_float()?, axes)?;
        Ok(Block::Mean(MeanRecord { n, total }))
    }

    fn combine(
        &self,
        block: &Block,
        axes: &AxisSet,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block> {
        self.merge(block, axes, primitives).map(Block::Mean)
    }

    fn aggregate(
        &self,
        block: &Block,
        axes: &AxisSet,
        keepdims: bool,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block> {
        let merged = self.merge(block, axes, primitives)?;
        // 0 / 0 is NaN, the undefined mean of an empty selection
        let mean = &merged.total / &merged.n;
        let mean = Block::Float(mean);
        Ok(if keepdims {
            mean
        } else {
            mean.remove_axes(axes.as_slice())
        })
    }
}
