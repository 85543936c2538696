//! Pluggable block-level primitives
//!
//! The tree planner never looks inside a block; every numeric step the
//! combinable algorithms take is routed through a [`BlockPrimitives`]
//! provider. [`NdarrayPrimitives`] is the default provider, built on
//! `ndarray` folds.
//!
//! All reducing primitives keep the reduced axes as size-1 dimensions.

use crate::block::Block;
use crate::errors::{ReductionError, Result};
use bitflags::bitflags;
use ndarray::{ArrayD, Axis, IxDyn};
use std::hash::{Hash, Hasher};

bitflags! {
    /// Operations a primitive provider can perform
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const SUM = 1 << 0;
        const PROD = 1 << 1;
        const MIN = 1 << 2;
        const MAX = 1 << 3;
        const ANY = 1 << 4;
        const ALL = 1 << 5;
        const NANSUM = 1 << 6;
        const NANPROD = 1 << 7;
        const NANMIN = 1 << 8;
        const NANMAX = 1 << 9;
        const ARGMIN = 1 << 10;
        const ARGMAX = 1 << 11;
        const NANARGMIN = 1 << 12;
        const NANARGMAX = 1 << 13;
        const ELEMENTWISE = 1 << 14;
    }
}

/// Plain elementwise block reducer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Sum,
    Prod,
    Min,
    Max,
    Any,
    All,
    NanSum,
    NanProd,
    NanMin,
    NanMax,
}

impl Primitive {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Prod => "prod",
            Self::Min => "min",
            Self::Max => "max",
            Self::Any => "any",
            Self::All => "all",
            Self::NanSum => "nansum",
            Self::NanProd => "nanprod",
            Self::NanMin => "nanmin",
            Self::NanMax => "nanmax",
        }
    }

    /// Capability a provider must report to run this primitive
    #[must_use]
    pub const fn capability(self) -> Capabilities {
        match self {
            Self::Sum => Capabilities::SUM,
            Self::Prod => Capabilities::PROD,
            Self::Min => Capabilities::MIN,
            Self::Max => Capabilities::MAX,
            Self::Any => Capabilities::ANY,
            Self::All => Capabilities::ALL,
            Self::NanSum => Capabilities::NANSUM,
            Self::NanProd => Capabilities::NANPROD,
            Self::NanMin => Capabilities::NANMIN,
            Self::NanMax => Capabilities::NANMAX,
        }
    }
}

/// Whether NaN elements take part in a computation or are skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NanPolicy {
    #[default]
    Propagate,
    Skip,
}

impl NanPolicy {
    /// Summation primitive matching this policy
    #[must_use]
    pub const fn sum(self) -> Primitive {
        match self {
            Self::Propagate => Primitive::Sum,
            Self::Skip => Primitive::NanSum,
        }
    }
}

/// Which extreme an arg reduction selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extreme {
    Min,
    Max,
}

impl Extreme {
    #[must_use]
    pub const fn capability(self, nan: NanPolicy) -> Capabilities {
        match (self, nan) {
            (Self::Min, NanPolicy::Propagate) => Capabilities::ARGMIN,
            (Self::Max, NanPolicy::Propagate) => Capabilities::ARGMAX,
            (Self::Min, NanPolicy::Skip) => Capabilities::NANARGMIN,
            (Self::Max, NanPolicy::Skip) => Capabilities::NANARGMAX,
        }
    }
}

/// Elementwise transform applied block by block
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementwiseOp {
    Abs,
    Pow(f64),
    Sqrt,
}

impl Eq for ElementwiseOp {}

impl Hash for ElementwiseOp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Abs => 0_u8.hash(state),
            Self::Pow(p) => {
                1_u8.hash(state);
                p.to_bits().hash(state);
            }
            Self::Sqrt => 2_u8.hash(state),
        }
    }
}

/// Provider of the per-block numeric primitives
pub trait BlockPrimitives: Send + Sync {
    /// Operations this provider implements
    fn capabilities(&self) -> Capabilities;

    /// Check that every flag in `required` is available
    fn supports(&self, required: Capabilities) -> bool {
        self.capabilities().contains(required)
    }

    /// Reduce `block` over `axes`, keeping them as size-1 dimensions
    ///
    /// # Errors
    ///
    /// Returns an error if the block kind is not plain data.
    fn reduce(&self, op: Primitive, block: &Block, axes: &[usize]) -> Result<Block>;

    /// Count elements over `axes`, optionally ignoring NaN
    ///
    /// # Errors
    ///
    /// Returns an error if the block kind is not plain data.
    fn count(&self, block: &Block, axes: &[usize], nan: NanPolicy) -> Result<ArrayD<f64>>;

    /// Locate the first minimum or maximum along `axis`
    ///
    /// Returns the extreme values and their positions along `axis`, both with
    /// `axis` kept at size 1. Lanes with nothing to select give `(NaN, -1)`.
    ///
    /// # Errors
    ///
    /// Returns an error if `axis` is out of bounds.
    fn arg_extreme(
        &self,
        extreme: Extreme,
        nan: NanPolicy,
        data: &ArrayD<f64>,
        axis: usize,
    ) -> Result<(ArrayD<f64>, ArrayD<i64>)>;

    /// Apply an elementwise transform
    ///
    /// # Errors
    ///
    /// Returns an error if the block kind is not plain data.
    fn elementwise(&self, op: ElementwiseOp, block: &Block) -> Result<Block>;
}

/// Default provider backed by `ndarray` folds
#[derive(Debug, Clone, Copy, Default)]
pub struct NdarrayPrimitives;

impl BlockPrimitives for NdarrayPrimitives {
    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn reduce(&self, op: Primitive, block: &Block, axes: &[usize]) -> Result<Block> {
        check_axes(block.ndim(), axes)?;
        let reduced = match (op, block) {
            (Primitive::Sum, Block::Float(a)) => Block::Float(fold_axes(a, axes, 0.0, |s, x| s + x)),
            (Primitive::NanSum, Block::Float(a)) => Block::Float(fold_axes(a, axes, 0.0, |s, x| {
                if x.is_nan() {
                    *s
                } else {
                    s + x
                }
            })),
            (Primitive::Prod, Block::Float(a)) => Block::Float(fold_axes(a, axes, 1.0, |p, x| p * x)),
            (Primitive::NanProd, Block::Float(a)) => Block::Float(fold_axes(a, axes, 1.0, |p, x| {
                if x.is_nan() {
                    *p
                } else {
                    p * x
                }
            })),
            (Primitive::Min, Block::Float(a)) => {
                Block::Float(fold_axes(a, axes, f64::INFINITY, |m, x| propagate(*m, *x, f64::min)))
            }
            (Primitive::Max, Block::Float(a)) => Block::Float(fold_axes(
                a,
                axes,
                f64::NEG_INFINITY,
                |m, x| propagate(*m, *x, f64::max),
            )),
            (Primitive::NanMin, Block::Float(a)) => {
                Block::Float(fold_axes(a, axes, f64::NAN, |m, x| skip(*m, *x, f64::min)))
            }
            (Primitive::NanMax, Block::Float(a)) => {
                Block::Float(fold_axes(a, axes, f64::NAN, |m, x| skip(*m, *x, f64::max)))
            }
            (Primitive::Sum | Primitive::NanSum, Block::Int(a)) => {
                Block::Int(fold_axes(a, axes, 0, |s, x| s.wrapping_add(*x)))
            }
            (Primitive::Prod | Primitive::NanProd, Block::Int(a)) => {
                Block::Int(fold_axes(a, axes, 1, |p, x| p.wrapping_mul(*x)))
            }
            (Primitive::Min | Primitive::NanMin, Block::Int(a)) => {
                Block::Int(fold_axes(a, axes, i64::MAX, |m, x| *m.min(x)))
            }
            (Primitive::Max | Primitive::NanMax, Block::Int(a)) => {
                Block::Int(fold_axes(a, axes, i64::MIN, |m, x| *m.max(x)))
            }
            (Primitive::Sum | Primitive::NanSum, Block::Bool(a)) => {
                Block::Int(fold_axes(&a.mapv(i64::from), axes, 0, |s, x| {
                    s.wrapping_add(*x)
                }))
            }
            (Primitive::Prod | Primitive::NanProd, Block::Bool(a)) => {
                Block::Int(fold_axes(&a.mapv(i64::from), axes, 1, |p, x| {
                    p.wrapping_mul(*x)
                }))
            }
            (Primitive::Min | Primitive::NanMin | Primitive::All, Block::Bool(a)) => {
                Block::Bool(fold_axes(a, axes, true, |m, x| *m && *x))
            }
            (Primitive::Max | Primitive::NanMax | Primitive::Any, Block::Bool(a)) => {
                Block::Bool(fold_axes(a, axes, false, |m, x| *m || *x))
            }
            (Primitive::Any, Block::Float(_) | Block::Int(_)) => {
                let truth = truthiness(block)?;
                Block::Bool(fold_axes(&truth, axes, false, |m, x| *m || *x))
            }
            (Primitive::All, Block::Float(_) | Block::Int(_)) => {
                let truth = truthiness(block)?;
                Block::Bool(fold_axes(&truth, axes, true, |m, x| *m && *x))
            }
            (op, other) => {
                return Err(ReductionError::type_mismatch(
                    op.as_str(),
                    "plain data",
                    other.kind(),
                ))
            }
        };
        Ok(reduced)
    }

    fn count(&self, block: &Block, axes: &[usize], nan: NanPolicy) -> Result<ArrayD<f64>> {
        check_axes(block.ndim(), axes)?;
        match (block, nan) {
            (Block::Float(a), NanPolicy::Skip) => {
                let present = a.mapv(|x| if x.is_nan() { 0.0 } else { 1.0 });
                Ok(fold_axes(&present, axes, 0.0, |s, x| s + x))
            }
            (Block::Float(_) | Block::Int(_) | Block::Bool(_), _) => {
                let shape = block.shape();
                let n: usize = axes.iter().map(|&axis| shape[axis]).product();
                let kept: Vec<usize> = shape
                    .iter()
                    .enumerate()
                    .map(|(axis, &len)| if axes.contains(&axis) { 1 } else { len })
                    .collect();
                #[allow(clippy::cast_precision_loss)]
                let n = n as f64;
                Ok(ArrayD::from_elem(IxDyn(&kept), n))
            }
            (other, _) => Err(ReductionError::type_mismatch(
                "count",
                "plain data",
                other.kind(),
            )),
        }
    }

    fn arg_extreme(
        &self,
        extreme: Extreme,
        nan: NanPolicy,
        data: &ArrayD<f64>,
        axis: usize,
    ) -> Result<(ArrayD<f64>, ArrayD<i64>)> {
        check_axes(data.ndim(), &[axis])?;
        let picked = data.map_axis(Axis(axis), |lane| {
            select_extreme(lane.iter().copied(), extreme, nan)
        });
        let values = picked.mapv(|(value, _)| value).insert_axis(Axis(axis));
        let index = picked.mapv(|(_, index)| index).insert_axis(Axis(axis));
        Ok((values, index))
    }

    fn elementwise(&self, op: ElementwiseOp, block: &Block) -> Result<Block> {
        if let (ElementwiseOp::Abs, Block::Int(a)) = (op, block) {
            let mut magnitudes = a.clone();
            magnitudes.par_mapv_inplace(i64::wrapping_abs);
            return Ok(Block::Int(magnitudes));
        }
        let mut values = block.to_float()?;
        match op {
            ElementwiseOp::Abs => values.par_mapv_inplace(f64::abs),
            ElementwiseOp::Pow(p) => values.par_mapv_inplace(|x| pow(x, p)),
            ElementwiseOp::Sqrt => values.par_mapv_inplace(f64::sqrt),
        }
        Ok(Block::Float(values))
    }
}

/// Fold over each axis in turn, re-inserting it as a size-1 dimension
fn fold_axes<T: Clone>(
    a: &ArrayD<T>,
    axes: &[usize],
    init: T,
    f: impl Fn(&T, &T) -> T,
) -> ArrayD<T> {
    let mut out = a.clone();
    for &axis in axes {
        out = out
            .fold_axis(Axis(axis), init.clone(), |acc, x| f(acc, x))
            .insert_axis(Axis(axis));
    }
    out
}

fn check_axes(ndim: usize, axes: &[usize]) -> Result<()> {
    match axes.iter().find(|&&axis| axis >= ndim) {
        Some(&axis) => Err(ReductionError::InvalidAxis {
            axis: isize::try_from(axis).unwrap_or(isize::MAX),
            ndim,
            reason: "out of range for block",
        }),
        None => Ok(()),
    }
}

fn propagate(acc: f64, x: f64, pick: fn(f64, f64) -> f64) -> f64 {
    if acc.is_nan() || x.is_nan() {
        f64::NAN
    } else {
        pick(acc, x)
    }
}

fn skip(acc: f64, x: f64, pick: fn(f64, f64) -> f64) -> f64 {
    if x.is_nan() {
        acc
    } else if acc.is_nan() {
        x
    } else {
        pick(acc, x)
    }
}

fn truthiness(block: &Block) -> Result<ArrayD<bool>> {
    match block {
        Block::Float(a) => Ok(a.mapv(|x| x != 0.0)),
        Block::Int(a) => Ok(a.mapv(|x| x != 0)),
        Block::Bool(a) => Ok(a.clone()),
        other => Err(ReductionError::type_mismatch(
            "truthiness",
            "plain data",
            other.kind(),
        )),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn pow(x: f64, p: f64) -> f64 {
    if p.fract() == 0.0 && p.abs() <= f64::from(i32::MAX) {
        x.powi(p as i32)
    } else {
        x.powf(p)
    }
}

/// First-occurrence selection of the extreme in a lane
///
/// Under [`NanPolicy::Propagate`] the first NaN wins, matching the usual
/// "NaN poisons min/max" rule. Under [`NanPolicy::Skip`] NaN is ignored.
pub(crate) fn select_extreme(
    lane: impl Iterator<Item = f64>,
    extreme: Extreme,
    nan: NanPolicy,
) -> (f64, i64) {
    let mut best: Option<(f64, i64)> = None;
    for (i, x) in lane.enumerate() {
        let i = i64::try_from(i).unwrap_or(i64::MAX);
        if x.is_nan() {
            if nan == NanPolicy::Propagate && best.map_or(true, |(b, _)| !b.is_nan()) {
                best = Some((x, i));
            }
            continue;
        }
        let better = match best {
            None => true,
            Some((b, _)) if b.is_nan() => false,
            Some((b, _)) => match extreme {
                Extreme::Min => x < b,
                Extreme::Max => x > b,
            },
        };
        if better {
            best = Some((x, i));
        }
    }
    best.unwrap_or((f64::NAN, -1))
}
