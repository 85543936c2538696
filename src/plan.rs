//! Axis normalization and fan-in planning
//!
//! Resolves which axes a reduction collapses, how many sibling blocks each
//! merge step may combine along every one of them, and how many tree levels
//! that takes.

use crate::errors::{ReductionError, Result};
use log::debug;
use std::collections::BTreeMap;

/// Axes requested by the caller, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Axes {
    /// Every axis of the array
    #[default]
    All,
    /// A single axis; negative values count from the end
    One(isize),
    /// Several axes; negative values count from the end
    Many(Vec<isize>),
}

impl From<isize> for Axes {
    fn from(axis: isize) -> Self {
        Self::One(axis)
    }
}

impl From<Vec<isize>> for Axes {
    fn from(axes: Vec<isize>) -> Self {
        Self::Many(axes)
    }
}

impl Axes {
    /// Resolve negative indices and reject out-of-range or repeated axes
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::InvalidAxis`] for an axis outside
    /// `-ndim..ndim` or an axis named twice.
    pub fn normalize(&self, ndim: usize) -> Result<AxisSet> {
        let requested: Vec<isize> = match self {
            Self::All => return Ok(AxisSet((0..ndim).collect())),
            Self::One(axis) => vec![*axis],
            Self::Many(axes) => axes.clone(),
        };

        let mut axes = Vec::with_capacity(requested.len());
        for axis in requested {
            let normalized = normalize_axis(axis, ndim)?;
            if axes.contains(&normalized) {
                return Err(ReductionError::InvalidAxis {
                    axis,
                    ndim,
                    reason: "repeated axis",
                });
            }
            axes.push(normalized);
        }
        axes.sort_unstable();
        Ok(AxisSet(axes))
    }
}

pub(crate) fn normalize_axis(axis: isize, ndim: usize) -> Result<usize> {
    let rank = isize::try_from(ndim).unwrap_or(isize::MAX);
    let shifted = if axis < 0 { axis + rank } else { axis };
    if (0..rank).contains(&shifted) {
        Ok(shifted.unsigned_abs())
    } else {
        Err(ReductionError::InvalidAxis {
            axis,
            ndim,
            reason: "out of range",
        })
    }
}

/// Normalized, sorted, duplicate-free set of reduced axes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AxisSet(Vec<usize>);

impl AxisSet {
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    #[must_use]
    pub fn contains(&self, axis: usize) -> bool {
        self.0.contains(&axis)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// The only axis of a one-axis set
    #[must_use]
    pub fn single(&self) -> Option<usize> {
        match self.0.as_slice() {
            [axis] => Some(*axis),
            _ => None,
        }
    }
}

impl From<&FanInMap> for AxisSet {
    fn from(fan_in: &FanInMap) -> Self {
        Self(fan_in.keys().copied().collect())
    }
}

/// Per-axis maximum number of sibling blocks merged in one step
pub type FanInMap = BTreeMap<usize, usize>;

/// Fan-in policy requested by the caller
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FanIn {
    /// Collapse every reduced axis in a single merge level
    #[default]
    Full,
    /// Explicit fan-in per axis; reduced axes left out default to 2
    PerAxis(BTreeMap<isize, usize>),
    /// Total fan-in budget shared evenly (in log space) by the reduced axes
    Budget(usize),
}

impl FanIn {
    /// Fan-in for every reduced axis
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::InvalidFanIn`] for a fan-in below one and
    /// [`ReductionError::InvalidAxis`] for a mapping key outside the array.
    pub fn resolve(&self, axes: &AxisSet, numblocks: &[usize]) -> Result<FanInMap> {
        match self {
            Self::Full => Ok(axes.iter().map(|axis| (axis, numblocks[axis])).collect()),
            Self::PerAxis(requested) => {
                let mut explicit = BTreeMap::new();
                for (&axis, &fan_in) in requested {
                    let axis = normalize_axis(axis, numblocks.len())?;
                    if fan_in < 1 {
                        return Err(ReductionError::InvalidFanIn {
                            axis: Some(axis),
                            fan_in,
                        });
                    }
                    explicit.insert(axis, fan_in);
                }
                Ok(axes
                    .iter()
                    .map(|axis| (axis, explicit.get(&axis).copied().unwrap_or(2)))
                    .collect())
            }
            Self::Budget(budget) => {
                if *budget < 1 {
                    return Err(ReductionError::InvalidFanIn {
                        axis: None,
                        fan_in: *budget,
                    });
                }
                if axes.is_empty() {
                    return Ok(FanInMap::new());
                }
                let per_axis = integer_root(*budget, axes.len()).max(2);
                Ok(axes.iter().map(|axis| (axis, per_axis)).collect())
            }
        }
    }
}

/// Largest `r` with `r^k <= n`
fn integer_root(n: usize, k: usize) -> usize {
    let exceeds = |r: usize| match u32::try_from(k).ok().and_then(|k| r.checked_pow(k)) {
        Some(power) => power > n,
        None => true,
    };
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let mut root = (n as f64).powf(1.0 / k as f64).floor() as usize;
    while root > 1 && exceeds(root) {
        root -= 1;
    }
    while let Some(next) = root.checked_add(1) {
        if exceeds(next) {
            break;
        }
        root = next;
    }
    root
}

/// Merge levels needed to bring `blocks` down to one with groups of `fan_in`
fn levels(blocks: usize, fan_in: usize) -> usize {
    let mut covered = 1_usize;
    let mut depth = 0;
    while covered < blocks {
        covered = covered.saturating_mul(fan_in);
        depth += 1;
    }
    depth
}

/// Number of merge levels, including the final aggregation
///
/// Axes with fan-in 1 never shrink and do not count toward the depth.
#[must_use]
pub fn tree_depth(fan_in: &FanInMap, numblocks: &[usize]) -> usize {
    fan_in
        .iter()
        .filter(|&(_, &f)| f > 1)
        .map(|(&axis, &f)| levels(numblocks[axis], f))
        .fold(1, usize::max)
}

/// Resolved axes, fan-in and tree depth of one reduction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReductionPlan {
    pub axes: AxisSet,
    pub fan_in: FanInMap,
    pub depth: usize,
}

impl ReductionPlan {
    /// Plan a reduction of an array with `numblocks` blocks per axis
    ///
    /// # Errors
    ///
    /// Returns an error if the axes or fan-in are invalid for the array.
    pub fn new(axes: &Axes, numblocks: &[usize], fan_in: &FanIn) -> Result<Self> {
        let axes = axes.normalize(numblocks.len())?;
        let fan_in = fan_in.resolve(&axes, numblocks)?;
        let depth = tree_depth(&fan_in, numblocks);
        debug!(
            "planned reduction over axes {:?} of {numblocks:?} blocks: fan-in {fan_in:?}, depth {depth}",
            axes.as_slice()
        );
        Ok(Self {
            axes,
            fan_in,
            depth,
        })
    }

    /// Fan-in for the terminal level
    ///
    /// An axis with fan-in 1 would still hold one group per block after the
    /// tree; the terminal level collapses it in a single step instead.
    #[must_use]
    pub fn final_fan_in(&self, numblocks: &[usize]) -> FanInMap {
        self.fan_in
            .iter()
            .map(|(&axis, &f)| (axis, if f == 1 { numblocks[axis].max(1) } else { f }))
            .collect()
    }
}
