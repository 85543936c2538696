//! Block values flowing through a task graph
//!
//! A [`Block`] is either plain array data or one of the sufficient-statistic
//! records produced by the combinable algorithms. Records are stored as a
//! struct of arrays so they can be concatenated field by field along the
//! reduced axes exactly like plain data.

use crate::errors::{ReductionError, Result};
use ndarray::{concatenate, ArrayD, Axis, Slice};
use std::hash::{Hash, Hasher};
use std::ops::Range;

/// Element type of a chunked array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Float64,
    Int64,
    Bool,
}

impl DType {
    /// Get the string representation of the element type
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Float64 => "float64",
            Self::Int64 => "int64",
            Self::Bool => "bool",
        }
    }
}

/// Per-block summary for the mean: element count and total
#[derive(Debug, Clone, PartialEq)]
pub struct MeanRecord {
    pub n: ArrayD<f64>,
    pub total: ArrayD<f64>,
}

/// Per-block summary for central moments of order 2..=k
///
/// `moments[j]` holds the sum of `(x - mean)^(j + 2)` about the block's own
/// mean.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentRecord {
    pub n: ArrayD<f64>,
    pub total: ArrayD<f64>,
    pub moments: Vec<ArrayD<f64>>,
}

impl MomentRecord {
    /// Highest moment order carried by the record
    #[must_use]
    pub fn order(&self) -> usize {
        self.moments.len() + 1
    }
}

/// Per-block summary for argmin/argmax
///
/// `index` is relative to the start of the first block covered by the
/// record; `n` is the number of elements covered along the reduced axis.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgRecord {
    pub value: ArrayD<f64>,
    pub index: ArrayD<i64>,
    pub n: ArrayD<i64>,
}

/// One block of data or of intermediate statistics
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Float(ArrayD<f64>),
    Int(ArrayD<i64>),
    Bool(ArrayD<bool>),
    Mean(MeanRecord),
    Moment(MomentRecord),
    Arg(ArgRecord),
}

impl Block {
    /// Short name of the block variant, used in error messages
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Float(_) => "float64",
            Self::Int(_) => "int64",
            Self::Bool(_) => "bool",
            Self::Mean(_) => "mean record",
            Self::Moment(_) => "moment record",
            Self::Arg(_) => "arg record",
        }
    }

    /// Element type for plain data blocks, `None` for records
    #[must_use]
    pub const fn dtype(&self) -> Option<DType> {
        match self {
            Self::Float(_) => Some(DType::Float64),
            Self::Int(_) => Some(DType::Int64),
            Self::Bool(_) => Some(DType::Bool),
            _ => None,
        }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Float(a) => a.shape(),
            Self::Int(a) => a.shape(),
            Self::Bool(a) => a.shape(),
            Self::Mean(r) => r.n.shape(),
            Self::Moment(r) => r.n.shape(),
            Self::Arg(r) => r.index.shape(),
        }
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Borrow the data of a float block
    pub fn as_float(&self) -> Result<&ArrayD<f64>> {
        match self {
            Self::Float(a) => Ok(a),
            other => Err(ReductionError::type_mismatch(
                "as_float",
                "float64",
                other.kind(),
            )),
        }
    }

    /// Copy plain data into a float array, converting ints and bools
    pub fn to_float(&self) -> Result<ArrayD<f64>> {
        match self {
            Self::Float(a) => Ok(a.clone()),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(a) => Ok(a.mapv(|x| x as f64)),
            Self::Bool(a) => Ok(a.mapv(|x| if x { 1.0 } else { 0.0 })),
            other => Err(ReductionError::type_mismatch(
                "to_float",
                "plain data",
                other.kind(),
            )),
        }
    }

    pub fn into_float(self) -> Result<ArrayD<f64>> {
        match self {
            Self::Float(a) => Ok(a),
            other => Err(ReductionError::type_mismatch(
                "into_float",
                "float64",
                other.kind(),
            )),
        }
    }

    pub fn into_int(self) -> Result<ArrayD<i64>> {
        match self {
            Self::Int(a) => Ok(a),
            other => Err(ReductionError::type_mismatch(
                "into_int",
                "int64",
                other.kind(),
            )),
        }
    }

    pub fn into_bool(self) -> Result<ArrayD<bool>> {
        match self {
            Self::Bool(a) => Ok(a),
            other => Err(ReductionError::type_mismatch(
                "into_bool",
                "bool",
                other.kind(),
            )),
        }
    }

    /// Convert plain data to the requested element type
    ///
    /// Float to int conversion truncates toward zero. Records cannot be cast.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn cast(self, dtype: DType) -> Result<Self> {
        let cast = match (self, dtype) {
            (b @ Self::Float(_), DType::Float64)
            | (b @ Self::Int(_), DType::Int64)
            | (b @ Self::Bool(_), DType::Bool) => b,
            (Self::Float(a), DType::Int64) => Self::Int(a.mapv(|x| x as i64)),
            (Self::Float(a), DType::Bool) => Self::Bool(a.mapv(|x| x != 0.0)),
            (Self::Int(a), DType::Float64) => Self::Float(a.mapv(|x| x as f64)),
            (Self::Int(a), DType::Bool) => Self::Bool(a.mapv(|x| x != 0)),
            (Self::Bool(a), DType::Float64) => Self::Float(a.mapv(|x| if x { 1.0 } else { 0.0 })),
            (Self::Bool(a), DType::Int64) => Self::Int(a.mapv(i64::from)),
            (other, _) => {
                return Err(ReductionError::type_mismatch(
                    "cast",
                    "plain data",
                    other.kind(),
                ))
            }
        };
        Ok(cast)
    }

    /// Extract the sub-block covering `ranges` (one range per axis)
    pub fn slice(&self, ranges: &[Range<usize>]) -> Result<Self> {
        if ranges.len() != self.ndim() {
            return Err(ReductionError::ChunkMismatch {
                message: format!(
                    "{} slice ranges for a block with {} dimensions",
                    ranges.len(),
                    self.ndim()
                ),
            });
        }
        match self {
            Self::Float(a) => Ok(Self::Float(slice_array(a, ranges))),
            Self::Int(a) => Ok(Self::Int(slice_array(a, ranges))),
            Self::Bool(a) => Ok(Self::Bool(slice_array(a, ranges))),
            other => Err(ReductionError::type_mismatch(
                "slice",
                "plain data",
                other.kind(),
            )),
        }
    }

    /// Remove size-1 axes, given in any order
    #[must_use]
    pub fn remove_axes(self, axes: &[usize]) -> Self {
        match self {
            Self::Float(a) => Self::Float(remove_axes(a, axes)),
            Self::Int(a) => Self::Int(remove_axes(a, axes)),
            Self::Bool(a) => Self::Bool(remove_axes(a, axes)),
            Self::Mean(r) => Self::Mean(MeanRecord {
                n: remove_axes(r.n, axes),
                total: remove_axes(r.total, axes),
            }),
            Self::Moment(r) => Self::Moment(MomentRecord {
                n: remove_axes(r.n, axes),
                total: remove_axes(r.total, axes),
                moments: r
                    .moments
                    .into_iter()
                    .map(|m| remove_axes(m, axes))
                    .collect(),
            }),
            Self::Arg(r) => Self::Arg(ArgRecord {
                value: remove_axes(r.value, axes),
                index: remove_axes(r.index, axes),
                n: remove_axes(r.n, axes),
            }),
        }
    }

    /// Concatenate blocks of the same kind along `axis`
    pub fn concatenate(axis: usize, blocks: &[Self]) -> Result<Self> {
        let first = blocks.first().ok_or_else(|| ReductionError::ChunkMismatch {
            message: "cannot concatenate an empty list of blocks".to_string(),
        })?;
        if blocks.len() == 1 {
            return Ok(first.clone());
        }

        match first {
            Self::Float(_) => {
                let parts = collect_parts(blocks, |b| match b {
                    Self::Float(a) => Some(a),
                    _ => None,
                })?;
                Ok(Self::Float(concat(axis, &parts)?))
            }
            Self::Int(_) => {
                let parts = collect_parts(blocks, |b| match b {
                    Self::Int(a) => Some(a),
                    _ => None,
                })?;
                Ok(Self::Int(concat(axis, &parts)?))
            }
            Self::Bool(_) => {
                let parts = collect_parts(blocks, |b| match b {
                    Self::Bool(a) => Some(a),
                    _ => None,
                })?;
                Ok(Self::Bool(concat(axis, &parts)?))
            }
            Self::Mean(_) => {
                let parts = collect_parts(blocks, |b| match b {
                    Self::Mean(r) => Some(r),
                    _ => None,
                })?;
                Ok(Self::Mean(MeanRecord {
                    n: concat(axis, &field(&parts, |r| &r.n))?,
                    total: concat(axis, &field(&parts, |r| &r.total))?,
                }))
            }
            Self::Moment(head) => {
                let parts = collect_parts(blocks, |b| match b {
                    Self::Moment(r) if r.moments.len() == head.moments.len() => Some(r),
                    _ => None,
                })?;
                let moments = (0..head.moments.len())
                    .map(|j| concat(axis, &field(&parts, |r| &r.moments[j])))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::Moment(MomentRecord {
                    n: concat(axis, &field(&parts, |r| &r.n))?,
                    total: concat(axis, &field(&parts, |r| &r.total))?,
                    moments,
                }))
            }
            Self::Arg(_) => {
                let parts = collect_parts(blocks, |b| match b {
                    Self::Arg(r) => Some(r),
                    _ => None,
                })?;
                Ok(Self::Arg(ArgRecord {
                    value: concat(axis, &field(&parts, |r| &r.value))?,
                    index: concat(axis, &field(&parts, |r| &r.index))?,
                    n: concat(axis, &field(&parts, |r| &r.n))?,
                }))
            }
        }
    }

    /// Stitch a row-major grid of blocks into one block
    ///
    /// `grid[i]` is the number of blocks along axis `i`; the last axis varies
    /// fastest in `blocks`.
    pub fn concatenate_grid(blocks: Vec<Self>, grid: &[usize]) -> Result<Self> {
        let expected: usize = grid.iter().product();
        if blocks.len() != expected {
            return Err(ReductionError::ChunkMismatch {
                message: format!(
                    "grid {grid:?} needs {expected} blocks, got {}",
                    blocks.len()
                ),
            });
        }

        let mut current = blocks;
        for (axis, &n) in grid.iter().enumerate().rev() {
            if n == 1 {
                continue;
            }
            current = current
                .chunks(n)
                .map(|group| Self::concatenate(axis, group))
                .collect::<Result<Vec<_>>>()?;
        }

        current
            .into_iter()
            .next()
            .ok_or_else(|| ReductionError::ChunkMismatch {
                message: "empty block grid".to_string(),
            })
    }

    /// Feed the block's kind, shape and contents into a hasher
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.shape().hash(state);
        match self {
            Self::Float(a) => hash_floats(a, state),
            Self::Int(a) => a.iter().for_each(|x| x.hash(state)),
            Self::Bool(a) => a.iter().for_each(|x| x.hash(state)),
            Self::Mean(r) => {
                hash_floats(&r.n, state);
                hash_floats(&r.total, state);
            }
            Self::Moment(r) => {
                hash_floats(&r.n, state);
                hash_floats(&r.total, state);
                r.moments.iter().for_each(|m| hash_floats(m, state));
            }
            Self::Arg(r) => {
                hash_floats(&r.value, state);
                r.index.iter().for_each(|x| x.hash(state));
                r.n.iter().for_each(|x| x.hash(state));
            }
        }
    }
}

fn hash_floats<H: Hasher>(a: &ArrayD<f64>, state: &mut H) {
    a.iter().for_each(|x| x.to_bits().hash(state));
}

fn slice_array<T: Clone>(a: &ArrayD<T>, ranges: &[Range<usize>]) -> ArrayD<T> {
    let mut view = a.view();
    for (axis, range) in ranges.iter().enumerate() {
        view.slice_axis_inplace(Axis(axis), Slice::from(range.clone()));
    }
    view.to_owned()
}

/// Drop size-1 axes from an array; highest axis first so indices stay valid
pub(crate) fn remove_axes<T>(mut a: ArrayD<T>, axes: &[usize]) -> ArrayD<T> {
    let mut sorted = axes.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    for axis in sorted {
        a = a.index_axis_move(Axis(axis), 0);
    }
    a
}

fn collect_parts<'a, T>(
    blocks: &'a [Block],
    pick: impl Fn(&'a Block) -> Option<&'a T>,
) -> Result<Vec<&'a T>> {
    let expected = blocks.first().map_or("block", Block::kind);
    blocks
        .iter()
        .map(|b| {
            pick(b).ok_or_else(|| ReductionError::type_mismatch("concatenate", expected, b.kind()))
        })
        .collect()
}

fn field<'a, R, T>(parts: &[&'a R], get: impl Fn(&'a R) -> &'a T) -> Vec<&'a T> {
    parts.iter().map(|r| get(*r)).collect()
}

fn concat<T: Clone>(axis: usize, parts: &[&ArrayD<T>]) -> Result<ArrayD<T>> {
    let views: Vec<_> = parts.iter().map(|a| a.view()).collect();
    Ok(concatenate(Axis(axis), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn grid_concatenation_is_row_major() {
        let blocks = vec![
            Block::Int(arr2(&[[0, 1]]).into_dyn()),
            Block::Int(arr2(&[[2]]).into_dyn()),
            Block::Int(arr2(&[[3, 4]]).into_dyn()),
            Block::Int(arr2(&[[5]]).into_dyn()),
        ];
        let joined = Block::concatenate_grid(blocks, &[2, 2]).unwrap();
        assert_eq!(joined, Block::Int(arr2(&[[0, 1, 2], [3, 4, 5]]).into_dyn()));
    }

    #[test]
    fn concatenating_mixed_kinds_fails() {
        let blocks = [
            Block::Float(arr1(&[1.0]).into_dyn()),
            Block::Int(arr1(&[1]).into_dyn()),
        ];
        assert!(matches!(
            Block::concatenate(0, &blocks),
            Err(ReductionError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn remove_axes_drops_size_one_dimensions() {
        let a = ArrayD::<f64>::zeros(ndarray::IxDyn(&[1, 3, 1]));
        let b = Block::Float(a).remove_axes(&[0, 2]);
        assert_eq!(b.shape(), &[3]);
    }
}
