//! Pre-wired reductions
//!
//! [`Reductions`] exposes one method per supported statistic. Each resolves
//! the result element type, picks the chunk/combine/aggregate functions and
//! hands them to [`reduction`]. Which statistics are available depends on
//! the capabilities of the primitive provider the facade was built for.

use super::{Algorithm, ArgReduction, BlockFn, MeanReduction, MomentReduction};
use crate::array::ChunkedArray;
use crate::block::DType;
use crate::errors::{ReductionError, Result};
use crate::plan::{Axes, FanIn};
use crate::primitives::{
    BlockPrimitives, Capabilities, ElementwiseOp, Extreme, NanPolicy, NdarrayPrimitives,
    Primitive,
};
use crate::reduction::reduction;
use log::debug;

/// Caller options shared by every reduction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReductionOptions {
    /// Axes to reduce
    pub axes: Axes,
    /// Keep reduced axes as size-1 dimensions
    pub keepdims: bool,
    /// Result element type, overriding the operation's default
    pub dtype: Option<DType>,
    /// Delta degrees of freedom for var, std and moment
    pub ddof: usize,
    /// Merge fan-in policy
    pub fan_in: FanIn,
}

impl ReductionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn axes(mut self, axes: impl Into<Axes>) -> Self {
        self.axes = axes.into();
        self
    }

    #[must_use]
    pub fn keepdims(mut self, keepdims: bool) -> Self {
        self.keepdims = keepdims;
        self
    }

    #[must_use]
    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    #[must_use]
    pub fn ddof(mut self, ddof: usize) -> Self {
        self.ddof = ddof;
        self
    }

    #[must_use]
    pub fn fan_in(mut self, fan_in: FanIn) -> Self {
        self.fan_in = fan_in;
        self
    }
}

/// Order of a vector norm
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum NormOrder {
    /// Euclidean norm
    #[default]
    Fro,
    /// Largest absolute value
    Inf,
    /// Smallest absolute value
    NegInf,
    /// `(sum |x|^p)^(1/p)`
    P(f64),
}

/// Supported statistical operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatOperation {
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
    Mean,
    NanMean,
    Var,
    NanVar,
    Std,
    NanStd,
    /// Central moment of the given order
    Moment(usize),
    /// Vector norm of the given order
    Norm(NormOrder),
    ArgMin,
    ArgMax,
    NanArgMin,
    NanArgMax,
}

impl StatOperation {
    /// Get the string representation of the operation
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
            Self::Mean => "mean",
            Self::NanMean => "nanmean",
            Self::Var => "var",
            Self::NanVar => "nanvar",
            Self::Std => "std",
            Self::NanStd => "nanstd",
            Self::Moment(_) => "moment",
            Self::Norm(_) => "vnorm",
            Self::ArgMin => "argmin",
            Self::ArgMax => "argmax",
            Self::NanArgMin => "nanargmin",
            Self::NanArgMax => "nanargmax",
        }
    }
}

/// Reductions available for one primitive provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reductions {
    capabilities: Capabilities,
}

impl Default for Reductions {
    fn default() -> Self {
        Self::new(&NdarrayPrimitives)
    }
}

impl Reductions {
    /// Facade gated by what `primitives` can do
    #[must_use]
    pub fn new(primitives: &dyn BlockPrimitives) -> Self {
        Self {
            capabilities: primitives.capabilities(),
        }
    }

    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn require(&self, required: Capabilities, operation: &str) -> Result<()> {
        if self.capabilities.contains(required) {
            Ok(())
        } else {
            Err(ReductionError::Unsupported(format!(
                "{operation} needs {:?}, provider offers {:?}",
                required.difference(self.capabilities),
                self.capabilities
            )))
        }
    }

    /// Run `operation` with `options`
    ///
    /// # Errors
    ///
    /// Returns an error if the operation is unsupported or its options are
    /// invalid for `x`.
    pub fn reduce(
        &self,
        x: &ChunkedArray,
        operation: StatOperation,
        options: &ReductionOptions,
    ) -> Result<ChunkedArray> {
        debug!("reduce '{}' with {} {options:?}", x.name(), operation.as_str());
        match operation {
            StatOperation::Sum => self.sum(x, options),
            StatOperation::Prod => self.prod(x, options),
            StatOperation::Min => self.min(x, options),
            StatOperation::Max => self.max(x, options),
            StatOperation::Any => self.any(x, options),
            StatOperation::All => self.all(x, options),
            StatOperation::NanSum => self.nansum(x, options),
            StatOperation::NanProd => self.nanprod(x, options),
            StatOperation::NanMin => self.nanmin(x, options),
            StatOperation::NanMax => self.nanmax(x, options),
            StatOperation::Mean => self.mean(x, options),
            StatOperation::NanMean => self.nanmean(x, options),
            StatOperation::Var => self.var(x, options),
            StatOperation::NanVar => self.nanvar(x, options),
            StatOperation::Std => self.std(x, options),
            StatOperation::NanStd => self.nanstd(x, options),
            StatOperation::Moment(order) => self.moment(x, order, options),
            StatOperation::Norm(order) => self.vnorm(x, order, options),
            StatOperation::ArgMin => self.argmin(x, options),
            StatOperation::ArgMax => self.argmax(x, options),
            StatOperation::NanArgMin => self.nanargmin(x, options),
            StatOperation::NanArgMax => self.nanargmax(x, options),
        }
    }

    /// Same primitive at every level except possibly the chunk step
    fn plain(
        &self,
        x: &ChunkedArray,
        chunk: Primitive,
        aggregate: Primitive,
        default_dtype: DType,
        options: &ReductionOptions,
    ) -> Result<ChunkedArray> {
        self.require(chunk.capability() | aggregate.capability(), chunk.as_str())?;
        reduction(
            x,
            BlockFn::Primitive(chunk),
            BlockFn::Primitive(aggregate),
            &options.axes,
            options.keepdims,
            options.dtype.unwrap_or(default_dtype),
            &options.fan_in,
            None,
        )
    }

    fn algorithm(
        &self,
        x: &ChunkedArray,
        algorithm: Algorithm,
        dtype: DType,
        options: &ReductionOptions,
    ) -> Result<ChunkedArray> {
        let (chunk, combine, aggregate) = BlockFn::triple(algorithm);
        reduction(
            x,
            chunk,
            aggregate,
            &options.axes,
            options.keepdims,
            dtype,
            &options.fan_in,
            Some(combine),
        )
    }

    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn sum(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.plain(x, Primitive::Sum, Primitive::Sum, accumulated(x)?, options)
    }

    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn prod(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.plain(x, Primitive::Prod, Primitive::Prod, accumulated(x)?, options)
    }

    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn min(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.plain(x, Primitive::Min, Primitive::Min, input_dtype(x)?, options)
    }

    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn max(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.plain(x, Primitive::Max, Primitive::Max, input_dtype(x)?, options)
    }

    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn any(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        input_dtype(x)?;
        self.plain(x, Primitive::Any, Primitive::Any, DType::Bool, options)
    }

    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn all(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        input_dtype(x)?;
        self.plain(x, Primitive::All, Primitive::All, DType::Bool, options)
    }

    /// Sum ignoring NaN
    ///
    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn nansum(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.plain(x, Primitive::NanSum, Primitive::Sum, accumulated(x)?, options)
    }

    /// Product ignoring NaN
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::Unsupported`] if the provider has no
    /// NaN-skipping product.
    pub fn nanprod(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.plain(x, Primitive::NanProd, Primitive::Prod, accumulated(x)?, options)
    }

    /// Minimum ignoring NaN; all-NaN positions give NaN
    ///
    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn nanmin(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.plain(x, Primitive::NanMin, Primitive::NanMin, input_dtype(x)?, options)
    }

    /// Maximum ignoring NaN; all-NaN positions give NaN
    ///
    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn nanmax(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.plain(x, Primitive::NanMax, Primitive::NanMax, input_dtype(x)?, options)
    }

    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn mean(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.mean_with(x, NanPolicy::Propagate, options)
    }

    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn nanmean(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.mean_with(x, NanPolicy::Skip, options)
    }

    fn mean_with(
        &self,
        x: &ChunkedArray,
        nan: NanPolicy,
        options: &ReductionOptions,
    ) -> Result<ChunkedArray> {
        input_dtype(x)?;
        self.require(summing(nan), "mean")?;
        let algorithm = Algorithm::Mean(MeanReduction::new(nan));
        self.algorithm(x, algorithm, options.dtype.unwrap_or(DType::Float64), options)
    }

    /// Variance with `options.ddof`
    ///
    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn var(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.moment_with(x, 2, NanPolicy::Propagate, options)
    }

    /// Variance ignoring NaN
    ///
    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn nanvar(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.moment_with(x, 2, NanPolicy::Skip, options)
    }

    /// Standard deviation, the square root of [`Reductions::var`]
    ///
    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn std(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.std_with(x, NanPolicy::Propagate, options)
    }

    /// Standard deviation ignoring NaN
    ///
    /// # Errors
    ///
    /// Returns an error for invalid axes or fan-in.
    pub fn nanstd(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.std_with(x, NanPolicy::Skip, options)
    }

    fn std_with(
        &self,
        x: &ChunkedArray,
        nan: NanPolicy,
        options: &ReductionOptions,
    ) -> Result<ChunkedArray> {
        self.require(Capabilities::ELEMENTWISE, "std")?;
        let variance = self.moment_with(x, 2, nan, &floating(options))?;
        variance.map_blocks(ElementwiseOp::Sqrt, options.dtype.unwrap_or(DType::Float64))
    }

    /// Central moment of `order`, divided by `n - options.ddof`
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::InvalidOrder`] if `order < 2`.
    pub fn moment(
        &self,
        x: &ChunkedArray,
        order: usize,
        options: &ReductionOptions,
    ) -> Result<ChunkedArray> {
        self.moment_with(x, order, NanPolicy::Propagate, options)
    }

    fn moment_with(
        &self,
        x: &ChunkedArray,
        order: usize,
        nan: NanPolicy,
        options: &ReductionOptions,
    ) -> Result<ChunkedArray> {
        input_dtype(x)?;
        let moment = MomentReduction::new(order, options.ddof, nan)?;
        self.require(summing(nan), "moment")?;
        let algorithm = Algorithm::Moment(moment);
        self.algorithm(x, algorithm, options.dtype.unwrap_or(DType::Float64), options)
    }

    /// Vector norm of the given order over the reduced axes
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::InvalidOrder`] for order 0 or NaN.
    pub fn vnorm(
        &self,
        x: &ChunkedArray,
        order: NormOrder,
        options: &ReductionOptions,
    ) -> Result<ChunkedArray> {
        let input = input_dtype(x)?;
        self.require(Capabilities::ELEMENTWISE, "vnorm")?;
        let dtype = options.dtype.unwrap_or(DType::Float64);
        let p = match order {
            NormOrder::Fro => 2.0,
            NormOrder::Inf => f64::INFINITY,
            NormOrder::NegInf => f64::NEG_INFINITY,
            NormOrder::P(p) => p,
        };
        if p.is_nan() || p == 0.0 {
            return Err(ReductionError::InvalidOrder(format!(
                "vector norm order must be non-zero, got {p}"
            )));
        }

        let magnitude = if input == DType::Int64 {
            DType::Int64
        } else {
            DType::Float64
        };
        let reduce_abs = |op: Primitive| {
            let magnitudes = x.map_blocks(ElementwiseOp::Abs, magnitude)?;
            self.plain(&magnitudes, op, op, dtype, options)
        };
        if p == f64::INFINITY {
            return reduce_abs(Primitive::Max);
        }
        if p == f64::NEG_INFINITY {
            return reduce_abs(Primitive::Min);
        }
        if p == 1.0 {
            return reduce_abs(Primitive::Sum);
        }

        let base = if p % 2.0 == 0.0 {
            x.clone()
        } else {
            x.map_blocks(ElementwiseOp::Abs, magnitude)?
        };
        let powered = base.map_blocks(ElementwiseOp::Pow(p), DType::Float64)?;
        let summed = self.plain(
            &powered,
            Primitive::Sum,
            Primitive::Sum,
            DType::Float64,
            &floating(options),
        )?;
        summed.map_blocks(ElementwiseOp::Pow(p.recip()), dtype)
    }

    /// # Errors
    ///
    /// Returns [`ReductionError::InvalidAxis`] unless exactly one axis is
    /// reduced.
    pub fn argmin(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.arg(x, Extreme::Min, NanPolicy::Propagate, options)
    }

    /// # Errors
    ///
    /// Returns [`ReductionError::InvalidAxis`] unless exactly one axis is
    /// reduced.
    pub fn argmax(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.arg(x, Extreme::Max, NanPolicy::Propagate, options)
    }

    /// Argmin ignoring NaN; all-NaN lanes give -1
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::InvalidAxis`] unless exactly one axis is
    /// reduced.
    pub fn nanargmin(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.arg(x, Extreme::Min, NanPolicy::Skip, options)
    }

    /// Argmax ignoring NaN; all-NaN lanes give -1
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::InvalidAxis`] unless exactly one axis is
    /// reduced.
    pub fn nanargmax(&self, x: &ChunkedArray, options: &ReductionOptions) -> Result<ChunkedArray> {
        self.arg(x, Extreme::Max, NanPolicy::Skip, options)
    }

    fn arg(
        &self,
        x: &ChunkedArray,
        extreme: Extreme,
        nan: NanPolicy,
        options: &ReductionOptions,
    ) -> Result<ChunkedArray> {
        input_dtype(x)?;
        let axes = options.axes.normalize(x.ndim())?;
        if axes.single().is_none() {
            return Err(ReductionError::InvalidAxis {
                axis: axes
                    .iter()
                    .nth(1)
                    .map_or(-1, |axis| isize::try_from(axis).unwrap_or(isize::MAX)),
                ndim: x.ndim(),
                reason: "arg reductions take exactly one axis",
            });
        }
        let arg = ArgReduction::new(extreme, nan);
        self.require(extreme.capability(nan), arg.label())?;
        self.algorithm(
            x,
            Algorithm::Arg(arg),
            options.dtype.unwrap_or(DType::Int64),
            options,
        )
    }
}

/// Element type of a plain-data input
/// Options for an intermediate step whose output is transformed again
fn floating(options: &ReductionOptions) -> ReductionOptions {
    ReductionOptions {
        dtype: None,
        ..options.clone()
    }
}

fn input_dtype(x: &ChunkedArray) -> Result<DType> {
    x.dtype()
        .ok_or_else(|| ReductionError::type_mismatch("reduce", "plain data", "statistic record"))
}

/// Default type of sums and products: integers stay integral
fn accumulated(x: &ChunkedArray) -> Result<DType> {
    Ok(match input_dtype(x)? {
        DType::Float64 => DType::Float64,
        DType::Int64 | DType::Bool => DType::Int64,
    })
}

const fn summing(nan: NanPolicy) -> Capabilities {
    match nan {
        NanPolicy::Propagate => Capabilities::SUM,
        NanPolicy::Skip => Capabilities::NANSUM,
    }
}
