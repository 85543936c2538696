//! chunk_reduce: tree reductions over block-partitioned n-dimensional arrays
//!
//! A chunked array is split into blocks along every axis. Reducing it over a
//! set of axes is planned as a tree: every block is first summarized on its
//! own, then neighbouring summaries are merged a bounded number at a time
//! (the fan-in) until one summary per output block remains, which is then
//! turned into the final value.
//!
//! ## Key Features
//!
//! - **Bounded fan-in**: per-axis or budgeted merge width controls graph size
//! - **Combinable statistics**: mean, central moments of any order, variance,
//!   standard deviation, argmin/argmax with global index tracking, vector norms
//! - **NaN-skipping variants** of every statistic
//! - **Pluggable primitives**: block-level numerics behind a trait, gated by
//!   capability flags
//! - **Parallel evaluation**: a Rayon-backed reference executor
//!
//! ## Module Organization
//!
//! - [`plan`]: axis normalization, fan-in resolution and tree depth
//! - [`reduction`]: the chunk, combine and aggregate graph levels
//! - [`statistics`]: combinable algorithms and the pre-wired reductions
//! - [`array`], [`graph`], [`block`]: chunked arrays and their task graphs
//! - [`primitives`]: per-block numerics
//! - [`parallel`]: thread pool configuration and the executor
//! - [`errors`]: centralized error handling
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chunk_reduce::prelude::*;
//! use ndarray::arr1;
//!
//! let data = arr1(&[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0]).into_dyn();
//! let x = ChunkedArray::from_array(data, Chunks::new(vec![vec![3, 3, 2]])?)?;
//!
//! let reductions = Reductions::default();
//! let options = ReductionOptions::new().fan_in(FanIn::Budget(2));
//! let mean = reductions.mean(&x, &options)?;
//!
//! let executor = Executor::new(&ParallelConfig::default())?;
//! let value = executor.compute(&mean)?.into_float()?;
//! assert_eq!(value[[]], 3.875);
//! # Ok::<(), chunk_reduce::ReductionError>(())
//! ```

pub mod array;
pub mod block;
pub mod errors;
pub mod graph;
pub mod parallel;
pub mod plan;
pub mod primitives;
pub mod reduction;
pub mod statistics;

pub use array::{ChunkedArray, Chunks};
pub use block::{Block, DType};
pub use errors::{ReductionError, Result};
pub use parallel::{Executor, ParallelConfig};
pub use plan::{Axes, AxisSet, FanIn, FanInMap, ReductionPlan};
pub use reduction::{map_chunks, partial_reduce, reduction};

// High-level convenience API
pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::array::{ChunkedArray, Chunks};
    pub use crate::block::{Block, DType};
    pub use crate::errors::{ReductionError, Result};
    pub use crate::parallel::{Executor, ParallelConfig};
    pub use crate::plan::{Axes, FanIn};
    pub use crate::primitives::{BlockPrimitives, NdarrayPrimitives};
    pub use crate::statistics::{NormOrder, ReductionOptions, Reductions, StatOperation};
}
