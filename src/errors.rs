//! Centralized error handling for chunk_reduce
//!
//! Every failure in this crate is raised synchronously while a plan is being
//! built or while the reference executor evaluates one. Nothing is retried or
//! recovered silently.

use thiserror::Error;

/// Main error type for planning and evaluating reductions
#[derive(Error, Debug)]
pub enum ReductionError {
    /// Axis index out of range for the array rank, or repeated
    #[error("Invalid axis {axis} for array with {ndim} dimensions: {reason}")]
    InvalidAxis {
        axis: isize,
        ndim: usize,
        reason: &'static str,
    },

    /// Moment or norm order that the algorithm cannot honour
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Fan-in below one, or a zero fan-in budget
    #[error("Invalid fan-in {fan_in}{}", .axis.map(|a| format!(" on axis {a}")).unwrap_or_default())]
    InvalidFanIn { axis: Option<usize>, fan_in: usize },

    /// Chunk layout does not describe the array it is attached to
    #[error("Chunk layout mismatch: {message}")]
    ChunkMismatch { message: String },

    /// A block of the wrong kind reached a block function
    #[error("Type mismatch in {operation}: expected {expected}, found {found}")]
    TypeMismatch {
        operation: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    /// The primitive provider lacks a capability the operation needs
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A task refers to a key that no layer of the graph defines
    #[error("Missing task for key {name}{index:?}")]
    MissingTask { name: String, index: Vec<usize> },

    /// Thread pool configuration error
    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    ArrayError(#[from] ndarray::ShapeError),
}

impl ReductionError {
    pub(crate) fn type_mismatch(
        operation: &'static str,
        expected: &'static str,
        found: &'static str,
    ) -> Self {
        Self::TypeMismatch {
            operation,
            expected,
            found,
        }
    }
}

/// Result type alias for chunk_reduce operations
pub type Result<T> = std::result::Result<T, ReductionError>;
