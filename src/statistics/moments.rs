//! Central moments and variance
//!
//! Each record carries the count `n`, the total `S` and the central moment
//! sums `M_2..M_k` of its elements about their own mean. Two groups merge
//! with the pairwise update
//!
//! ```text
//! M_p = Σ_g [ M_p,g + n_g δ_g^p + Σ_{j=1}^{p-2} C(p, j) M_{p-j},g δ_g^j ]
//! ```
//!
//! where `δ_g` is group `g`'s mean minus the merged mean. Everything is
//! recentred on the merged mean; raw power sums are never formed.

use super::{reduce_float, Combinable};
use crate::block::{Block, MomentRecord};
use crate::errors::{ReductionError, Result};
use crate::plan::AxisSet;
use crate::primitives::{BlockPrimitives, NanPolicy};
use ndarray::{ArrayD, Zip};

/// Central moment of a fixed order, divided by `n - ddof`
///
/// Order 2 is the variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MomentReduction {
    order: usize,
    ddof: usize,
    nan: NanPolicy,
}

impl MomentReduction {
    /// Moment of `order` with `ddof` degrees-of-freedom adjustment
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::InvalidOrder`] if `order < 2`.
    pub fn new(order: usize, ddof: usize, nan: NanPolicy) -> Result<Self> {
        if order < 2 {
            return Err(ReductionError::InvalidOrder(format!(
                "moment order must be at least 2, got {order}"
            )));
        }
        Ok(Self { order, ddof, nan })
    }

    /// Variance with `ddof` degrees-of-freedom adjustment
    #[must_use]
    pub const fn variance(ddof: usize, nan: NanPolicy) -> Self {
        Self {
            order: 2,
            ddof,
            nan,
        }
    }

    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    #[must_use]
    pub const fn ddof(&self) -> usize {
        self.ddof
    }

    pub(crate) fn label(&self) -> String {
        let prefix = match self.nan {
            NanPolicy::Propagate => "",
            NanPolicy::Skip => "nan",
        };
        if self.order == 2 {
            format!("{prefix}var")
        } else {
            format!("{prefix}moment{}", self.order)
        }
    }

    fn record<'a>(&self, block: &'a Block) -> Result<&'a MomentRecord> {
        match block {
            Block::Moment(record) if record.order() >= self.order => Ok(record),
            other => Err(ReductionError::type_mismatch(
                "moment combine",
                "moment record",
                other.kind(),
            )),
        }
    }

    /// Merged `n`, total, and each group's mean offset from the merged mean
    fn centre(
        &self,
        record: &MomentRecord,
        axes: &AxisSet,
        primitives: &dyn BlockPrimitives,
    ) -> Result<(ArrayD<f64>, ArrayD<f64>, ArrayD<f64>)> {
        let sum = self.nan.sum();
        let n = reduce_float(primitives, sum, &record.n, axes)?;
        let total = reduce_float(primitives, sum, &record.total, axes)?;
        let mu = &total / &n;
        let group_means = &record.total / &record.n;
        let delta = broadcast_zip(&group_means, &mu, |m, u| m - u)?;
        Ok((n, total, delta))
    }

    /// Merged moment sum of order `p`
    fn merged_moment(
        &self,
        record: &MomentRecord,
        delta: &ArrayD<f64>,
        p: usize,
        axes: &AxisSet,
        primitives: &dyn BlockPrimitives,
    ) -> Result<ArrayD<f64>> {
        let sum = self.nan.sum();
        let exponent = power(p)?;
        let own = reduce_float(primitives, sum, &record.moments[p - 2], axes)?;
        let shift = Zip::from(&record.n)
            .and(delta)
            .map_collect(|&n, &d| n * d.powi(exponent));
        let mut merged = own + reduce_float(primitives, sum, &shift, axes)?;

        for j in 1..p - 1 {
            let exponent = power(j)?;
            let cross = Zip::from(&record.moments[p - j - 2])
                .and(delta)
                .map_collect(|&m, &d| m * d.powi(exponent));
            let cross = reduce_float(primitives, sum, &cross, axes)?;
            let coefficient = binomial(p, j);
            merged.zip_mut_with(&cross, |acc, &c| *acc += coefficient * c);
        }
        Ok(merged)
    }
}

impl Combinable for MomentReduction {
    fn chunk(
        &self,
        block: &Block,
        axes: &AxisSet,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block> {
        let data = block.to_float()?;
        let sum = self.nan.sum();
        let total = reduce_float(primitives, sum, &data, axes)?;
        let n = primitives.count(block, axes.as_slice(), self.nan)?;
        let mean = &total / &n;

        let moments = (2..=self.order)
            .map(|p| {
                let exponent = power(p)?;
                let deviation = broadcast_zip(&data, &mean, |x, u| (x - u).powi(exponent))?;
                reduce_float(primitives, sum, &deviation, axes)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Block::Moment(MomentRecord { n, total, moments }))
    }

    fn combine(
        &self,
        block: &Block,
        axes: &AxisSet,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block> {
        let record = self.record(block)?;
        let (n, total, delta) = self.centre(record, axes, primitives)?;
        let moments = (2..=self.order)
            .map(|p| self.merged_moment(record, &delta, p, axes, primitives))
            .collect::<Result<Vec<_>>>()?;
        Ok(Block::Moment(MomentRecord { n, total, moments }))
    }

    fn aggregate(
        &self,
        block: &Block,
        axes: &AxisSet,
        keepdims: bool,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block> {
        let record = self.record(block)?;
        let (n, _, delta) = self.centre(record, axes, primitives)?;
        let merged = self.merged_moment(record, &delta, self.order, axes, primitives)?;

        #[allow(clippy::cast_precision_loss)]
        let ddof = self.ddof as f64;
        let moment = Zip::from(&merged).and(&n).map_collect(|&m, &n| {
            let denominator = n - ddof;
            if denominator > 0.0 {
                m / denominator
            } else {
                f64::NAN
            }
        });

        let moment = Block::Float(moment);
        Ok(if keepdims {
            moment
        } else {
            moment.remove_axes(axes.as_slice())
        })
    }
}

/// Combine `full` with `small` broadcast up to `full`'s shape
fn broadcast_zip(
    full: &ArrayD<f64>,
    small: &ArrayD<f64>,
    f: impl Fn(f64, f64) -> f64,
) -> Result<ArrayD<f64>> {
    let small = small
        .broadcast(full.raw_dim())
        .ok_or_else(|| ReductionError::ChunkMismatch {
            message: format!(
                "cannot broadcast {:?} to {:?}",
                small.shape(),
                full.shape()
            ),
        })?;
    Ok(Zip::from(full).and(&small).map_collect(|&x, &y| f(x, y)))
}

fn power(p: usize) -> Result<i32> {
    i32::try_from(p).map_err(|_| ReductionError::InvalidOrder(format!("order {p} is too large")))
}

#[allow(clippy::cast_precision_loss)]
fn binomial(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}
