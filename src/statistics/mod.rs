//! Combinable aggregate algorithms
//!
//! Every statistic is a {chunk, combine, aggregate} triple over a record
//! type, expressed by the [`Combinable`] trait:
//!
//! - `chunk` summarizes one raw block into a record,
//! - `combine` merges a concatenation of records into one record,
//! - `aggregate` merges records and finalizes the user-visible value.
//!
//! Graph tasks name the function they run through [`BlockFn`], a tagged
//! choice between a plain primitive and one stage of an [`Algorithm`].
//!
//! # Organization
//!
//! - [`mean`]: count/total records
//! - [`moments`]: central moments and variance
//! - [`arg`]: argmin/argmax with global index tracking
//! - [`operations`]: options, operation tags and the pre-wired reductions

pub mod arg;
pub mod mean;
pub mod moments;
pub mod operations;

pub use arg::ArgReduction;
pub use mean::MeanReduction;
pub use moments::MomentReduction;
pub use operations::{NormOrder, ReductionOptions, Reductions, StatOperation};

use crate::block::Block;
use crate::errors::Result;
use crate::plan::AxisSet;
use crate::primitives::{BlockPrimitives, Primitive};
use ndarray::ArrayD;

/// Capability interface of a combinable statistic
pub trait Combinable {
    /// Summarize one raw block, keeping reduced axes at size 1
    ///
    /// # Errors
    ///
    /// Returns an error if the block is not plain data or the axes do not fit.
    fn chunk(&self, block: &Block, axes: &AxisSet, primitives: &dyn BlockPrimitives)
        -> Result<Block>;

    /// Merge records concatenated along `axes` into one record per position
    ///
    /// # Errors
    ///
    /// Returns an error if the block is not this statistic's record.
    fn combine(
        &self,
        block: &Block,
        axes: &AxisSet,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block>;

    /// Merge records and produce the final value
    ///
    /// # Errors
    ///
    /// Returns an error if the block is not this statistic's record.
    fn aggregate(
        &self,
        block: &Block,
        axes: &AxisSet,
        keepdims: bool,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block>;
}

/// Statistics whose merge step is more than a plain fold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Mean(MeanReduction),
    Moment(MomentReduction),
    Arg(ArgReduction),
}

impl Algorithm {
    fn label(&self) -> String {
        match self {
            Self::Mean(m) => m.label().to_string(),
            Self::Moment(m) => m.label(),
            Self::Arg(a) => a.label().to_string(),
        }
    }

    fn as_combinable(&self) -> &dyn Combinable {
        match self {
            Self::Mean(m) => m,
            Self::Moment(m) => m,
            Self::Arg(a) => a,
        }
    }
}

/// Which function of a triple a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Chunk,
    Combine,
    Aggregate,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chunk => "chunk",
            Self::Combine => "combine",
            Self::Aggregate => "agg",
        }
    }
}

/// Block function stored in a graph task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockFn {
    /// The same plain reducer at every stage
    Primitive(Primitive),
    /// One stage of a combinable algorithm
    Stage(Algorithm, Stage),
}

impl BlockFn {
    /// Chunk, combine and aggregate functions of `algorithm`
    #[must_use]
    pub const fn triple(algorithm: Algorithm) -> (Self, Self, Self) {
        (
            Self::Stage(algorithm, Stage::Chunk),
            Self::Stage(algorithm, Stage::Combine),
            Self::Stage(algorithm, Stage::Aggregate),
        )
    }

    /// Human-readable prefix for layer names
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Primitive(op) => op.as_str().to_string(),
            Self::Stage(algorithm, stage) => format!("{}-{}", algorithm.label(), stage.as_str()),
        }
    }

    /// Run the function on a (possibly concatenated) block
    ///
    /// # Errors
    ///
    /// Returns an error if the block does not match what the function expects.
    pub fn apply(
        &self,
        block: &Block,
        axes: &AxisSet,
        keepdims: bool,
        primitives: &dyn BlockPrimitives,
    ) -> Result<Block> {
        let kept = match self {
            Self::Primitive(op) => primitives.reduce(*op, block, axes.as_slice())?,
            Self::Stage(algorithm, Stage::Chunk) => {
                algorithm.as_combinable().chunk(block, axes, primitives)?
            }
            Self::Stage(algorithm, Stage::Combine) => {
                algorithm.as_combinable().combine(block, axes, primitives)?
            }
            Self::Stage(algorithm, Stage::Aggregate) => {
                return algorithm
                    .as_combinable()
                    .aggregate(block, axes, keepdims, primitives)
            }
        };
        Ok(if keepdims {
            kept
        } else {
            kept.remove_axes(axes.as_slice())
        })
    }
}

/// Reduce a float array with a plain primitive, keeping dimensions
pub(crate) fn reduce_float(
    primitives: &dyn BlockPrimitives,
    op: Primitive,
    data: &ArrayD<f64>,
    axes: &AxisSet,
) -> Result<ArrayD<f64>> {
    primitives
        .reduce(op, &Block::Float(data.clone()), axes.as_slice())?
        .into_float()
}
