//! End-to-end reductions: build a graph, evaluate it, compare with ndarray

use approx::{assert_abs_diff_eq, assert_relative_eq};
use chunk_reduce::prelude::{
    Axes, Block, ChunkedArray, Chunks, Executor, FanIn, NormOrder, ParallelConfig,
    ReductionOptions, Reductions,
};
use chunk_reduce::statistics::StatOperation as Op;
use chunk_reduce::FanInMap;
use ndarray::{arr1, Array, ArrayD, Axis, IxDyn};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn executor() -> Executor {
    Executor::new(&ParallelConfig::with_threads(2)).unwrap()
}

fn evaluate(result: &ChunkedArray) -> ArrayD<f64> {
    executor().compute(result).unwrap().to_float().unwrap()
}

fn scenario() -> ChunkedArray {
    let data = arr1(&[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0]).into_dyn();
    ChunkedArray::from_array(data, Chunks::new(vec![vec![3, 3, 2]]).unwrap()).unwrap()
}

fn table() -> ArrayD<f64> {
    Array::from_shape_fn(IxDyn(&[6, 10]), |ix| ((ix[0] * 7 + ix[1] * 13) % 11) as f64 - 5.0)
}

fn split(data: &ArrayD<f64>, block: &[usize]) -> ChunkedArray {
    ChunkedArray::from_array(data.clone(), Chunks::regular(data.shape(), block).unwrap()).unwrap()
}

fn assert_close(actual: &ArrayD<f64>, expected: &ArrayD<f64>, epsilon: f64) {
    assert_eq!(actual.shape(), expected.shape());
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*a, *e, epsilon = epsilon);
    }
}

fn first_extreme(values: &[f64], max: bool) -> i64 {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if (max && v > values[best]) || (!max && v < values[best]) {
            best = i;
        }
    }
    best as i64
}

#[test]
fn test_scenario_values() {
    let x = scenario();
    let reductions = Reductions::default();
    let budget = ReductionOptions::new().fan_in(FanIn::Budget(2));

    let sum = evaluate(&reductions.sum(&x, &budget).unwrap());
    assert_eq!(sum[[]], 31.0);

    let mean = evaluate(&reductions.mean(&x, &budget).unwrap());
    assert_eq!(mean[[]], 3.875);

    let var = evaluate(&reductions.var(&x, &budget).unwrap());
    assert_relative_eq!(var[[]], 6.609375, epsilon = 1e-12);

    let argmax = executor()
        .compute(&reductions.argmax(&x, &budget).unwrap())
        .unwrap()
        .into_int()
        .unwrap();
    assert_eq!(argmax[[]], 5);

    let std = evaluate(&reductions.std(&x, &budget.clone().ddof(1)).unwrap());
    assert_relative_eq!(std[[]], (52.875_f64 / 7.0).sqrt(), epsilon = 1e-12);
}

#[test]
fn test_full_and_pairwise_fan_in_agree() {
    let data = table();
    let x = split(&data, &[2, 3]);
    let reductions = Reductions::default();

    let exact = [Op::Sum, Op::Min, Op::Max, Op::Any, Op::All, Op::Prod, Op::Mean];
    let approximate = [Op::Var, Op::Moment(3), Op::Moment(4), Op::Std];

    for axes in [Axes::One(0), Axes::One(1), Axes::All] {
        let full = ReductionOptions::new().axes(axes.clone());
        let pairwise = full.clone().fan_in(FanIn::Budget(2));

        for op in exact {
            let a = evaluate(&reductions.reduce(&x, op, &full).unwrap());
            let b = evaluate(&reductions.reduce(&x, op, &pairwise).unwrap());
            assert_eq!(a, b, "{} over {axes:?}", op.as_str());
        }
        for op in approximate {
            let a = evaluate(&reductions.reduce(&x, op, &full).unwrap());
            let b = evaluate(&reductions.reduce(&x, op, &pairwise).unwrap());
            assert_close(&a, &b, 1e-9);
        }
    }

    for axis in [0, 1] {
        let full = ReductionOptions::new().axes(Axes::One(axis));
        let pairwise = full.clone().fan_in(FanIn::PerAxis(BTreeMap::from([(axis, 2)])));
        for op in [Op::ArgMin, Op::ArgMax] {
            let a = executor()
                .compute(&reductions.reduce(&x, op, &full).unwrap())
                .unwrap();
            let b = executor()
                .compute(&reductions.reduce(&x, op, &pairwise).unwrap())
                .unwrap();
            assert_eq!(a, b, "{} over axis {axis}", op.as_str());
        }
    }
}

#[test]
fn test_matches_direct_computation() {
    let data = table();
    let x = split(&data, &[4, 3]);
    let reductions = Reductions::default();
    let options = ReductionOptions::new()
        .axes(Axes::One(1))
        .fan_in(FanIn::Budget(2));

    let sum = evaluate(&reductions.sum(&x, &options).unwrap());
    assert_eq!(sum, data.sum_axis(Axis(1)));

    let mean = evaluate(&reductions.mean(&x, &options).unwrap());
    assert_close(&mean, &data.mean_axis(Axis(1)).unwrap(), 1e-12);

    let var = evaluate(&reductions.var(&x, &options.clone().ddof(1)).unwrap());
    assert_close(&var, &data.var_axis(Axis(1), 1.0), 1e-9);

    let argmax = executor()
        .compute(&reductions.argmax(&x, &options).unwrap())
        .unwrap()
        .into_int()
        .unwrap();
    for (row, lane) in data.axis_iter(Axis(0)).enumerate() {
        let values: Vec<f64> = lane.iter().copied().collect();
        assert_eq!(argmax[[row]], first_extreme(&values, true));
    }
}

#[test]
fn test_single_block_is_chunk_result() {
    let data = table();
    let x = split(&data, &[6, 10]);
    let reductions = Reductions::default();
    let options = ReductionOptions::new().axes(Axes::One(0)).fan_in(FanIn::Budget(2));

    let max = evaluate(&reductions.max(&x, &options).unwrap());
    assert_eq!(max, data.fold_axis(Axis(0), f64::NEG_INFINITY, |&m, &v| m.max(v)));

    let mean = evaluate(&reductions.mean(&x, &options).unwrap());
    assert_close(&mean, &data.mean_axis(Axis(0)).unwrap(), 1e-12);

    let var = evaluate(&reductions.var(&x, &options).unwrap());
    assert_close(&var, &data.var_axis(Axis(0), 0.0), 1e-9);
}

#[test]
fn test_splits_reproduce_whole_data_moments() {
    let values: Vec<f64> = (0..30).map(|i| ((i * 17) % 23) as f64 * 0.5 - 3.0).collect();
    let whole = Array::from(values.clone()).into_dyn();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let central = |p: i32| values.iter().map(|v| (v - mean).powi(p)).sum::<f64>() / n;

    let reductions = Reductions::default();
    for parts in [2, 3, 5] {
        let x = split(&whole, &[values.len() / parts]);
        let options = ReductionOptions::new().fan_in(FanIn::Budget(2));

        let m = evaluate(&reductions.mean(&x, &options).unwrap());
        assert_relative_eq!(m[[]], mean, epsilon = 1e-12);

        let v = evaluate(&reductions.var(&x, &options).unwrap());
        assert_relative_eq!(v[[]], central(2), epsilon = 1e-9);

        let m3 = evaluate(&reductions.moment(&x, 3, &options).unwrap());
        assert_abs_diff_eq!(m3[[]], central(3), epsilon = 1e-9);

        let m4 = evaluate(&reductions.moment(&x, 4, &options).unwrap());
        assert_relative_eq!(m4[[]], central(4), epsilon = 1e-9);
    }
}

#[test]
fn test_arg_extreme_outside_first_block() {
    let data = arr1(&[4.0, 2.0, 7.0, 7.0, -1.0, 0.0, 9.0, -1.0, 9.0]).into_dyn();
    let reductions = Reductions::default();
    for sizes in [vec![9], vec![3, 3, 3], vec![1, 2, 3, 3], vec![4, 5], vec![2, 2, 2, 2, 1]] {
        let x = ChunkedArray::from_array(data.clone(), Chunks::new(vec![sizes.clone()]).unwrap())
            .unwrap();
        let options = ReductionOptions::new().fan_in(FanIn::Budget(2));
        let argmax = executor()
            .compute(&reductions.argmax(&x, &options).unwrap())
            .unwrap()
            .into_int()
            .unwrap();
        let argmin = executor()
            .compute(&reductions.argmin(&x, &options).unwrap())
            .unwrap()
            .into_int()
            .unwrap();
        assert_eq!(argmax[[]], 6, "blocks {sizes:?}");
        assert_eq!(argmin[[]], 4, "blocks {sizes:?}");
    }
}

#[test]
fn test_keepdims_shapes() {
    let data = table();
    let x = split(&data, &[2, 3]);
    let reductions = Reductions::default();

    let kept = evaluate(
        &reductions
            .mean(&x, &ReductionOptions::new().axes(Axes::One(1)).keepdims(true))
            .unwrap(),
    );
    assert_eq!(kept.shape(), &[6, 1]);

    let all_kept = evaluate(&reductions.sum(&x, &ReductionOptions::new().keepdims(true)).unwrap());
    assert_eq!(all_kept.shape(), &[1, 1]);

    let dropped = evaluate(&reductions.var(&x, &ReductionOptions::new().axes(Axes::One(0))).unwrap());
    assert_eq!(dropped.shape(), &[10]);

    let arg_kept = executor()
        .compute(
            &reductions
                .argmin(
                    &x,
                    &ReductionOptions::new()
                        .axes(Axes::One(0))
                        .keepdims(true)
                        .fan_in(FanIn::Budget(2)),
                )
                .unwrap(),
        )
        .unwrap();
    assert_eq!(arg_kept.shape(), &[1, 10]);
}

#[test]
fn test_keepdims_values_match_dropped() {
    let data = table();
    let x = split(&data, &[2, 3]);
    let reductions = Reductions::default();
    let budget = ReductionOptions::new().fan_in(FanIn::Budget(2));

    for (op, axis) in [(Op::Max, 0_usize), (Op::Var, 1), (Op::Mean, 0), (Op::ArgMin, 1)] {
        let options = budget.clone().axes(Axes::One(axis as isize));
        let kept = evaluate(
            &reductions
                .reduce(&x, op, &options.clone().keepdims(true))
                .unwrap(),
        );
        let dropped = evaluate(&reductions.reduce(&x, op, &options).unwrap());
        assert_eq!(kept.shape()[axis], 1, "{}", op.as_str());
        let squeezed = kept.index_axis(Axis(axis), 0).to_owned();
        assert_close(&squeezed, &dropped, 1e-12);
    }
}

#[test]
fn test_integer_overflow_wraps() {
    let reductions = Reductions::default();
    let options = ReductionOptions::new().fan_in(FanIn::Budget(2));

    let factors = Block::Int(Array::from_shape_vec(IxDyn(&[25]), (1..=25).collect()).unwrap());
    let x = ChunkedArray::from_block(factors, Chunks::regular(&[25], &[5]).unwrap()).unwrap();
    let product = executor().compute(&reductions.prod(&x, &options).unwrap()).unwrap();
    assert_eq!(
        product,
        Block::Int(ArrayD::from_elem(IxDyn(&[]), 7_034_535_277_573_963_776))
    );

    let edge = Block::Int(Array::from_shape_vec(IxDyn(&[2]), vec![i64::MAX, 1]).unwrap());
    let y = ChunkedArray::from_block(edge, Chunks::regular(&[2], &[1]).unwrap()).unwrap();
    for sum in [reductions.sum(&y, &options), reductions.nansum(&y, &options)] {
        let total = executor().compute(&sum.unwrap()).unwrap();
        assert_eq!(total, Block::Int(ArrayD::from_elem(IxDyn(&[]), i64::MIN)));
    }
}

#[test]
fn test_unbounded_budget_collapses_in_one_level() {
    let x = scenario();
    let result = Reductions::default()
        .sum(&x, &ReductionOptions::new().fan_in(FanIn::Budget(usize::MAX)))
        .unwrap();
    assert_eq!(evaluate(&result)[[]], 31.0);
}

#[test]
fn test_fan_in_one_reduces_fully() {
    let data = table();
    let x = split(&data, &[1, 5]);
    let options = ReductionOptions::new().fan_in(FanIn::PerAxis(BTreeMap::from([(0, 1), (1, 2)])));
    let sum = evaluate(&Reductions::default().sum(&x, &options).unwrap());
    assert_eq!(sum[[]], data.sum());
}

#[test]
fn test_nan_skipping_reductions() {
    let nan = f64::NAN;
    let data = arr1(&[nan, 2.0, nan, 4.0, nan, nan]).into_dyn();
    let x = split(&data, &[2]);
    let reductions = Reductions::default();
    let options = ReductionOptions::new().fan_in(FanIn::Budget(2));

    assert_eq!(evaluate(&reductions.nansum(&x, &options).unwrap())[[]], 6.0);
    assert_eq!(evaluate(&reductions.nanprod(&x, &options).unwrap())[[]], 8.0);
    assert_eq!(evaluate(&reductions.nanmin(&x, &options).unwrap())[[]], 2.0);
    assert_eq!(evaluate(&reductions.nanmax(&x, &options).unwrap())[[]], 4.0);
    assert_eq!(evaluate(&reductions.nanmean(&x, &options).unwrap())[[]], 3.0);
    assert_eq!(evaluate(&reductions.nanvar(&x, &options).unwrap())[[]], 1.0);
    assert_eq!(evaluate(&reductions.nanstd(&x, &options).unwrap())[[]], 1.0);

    assert!(evaluate(&reductions.sum(&x, &options).unwrap())[[]].is_nan());
    assert!(evaluate(&reductions.max(&x, &options).unwrap())[[]].is_nan());
    assert!(evaluate(&reductions.mean(&x, &options).unwrap())[[]].is_nan());

    let nanargmax = executor()
        .compute(&reductions.nanargmax(&x, &options).unwrap())
        .unwrap()
        .into_int()
        .unwrap();
    assert_eq!(nanargmax[[]], 3);

    // argmin propagates the first NaN
    let argmin = executor()
        .compute(&reductions.argmin(&x, &options).unwrap())
        .unwrap()
        .into_int()
        .unwrap();
    assert_eq!(argmin[[]], 0);
}

#[test]
fn test_all_nan_lanes() {
    let nan = f64::NAN;
    let data = Array::from_shape_vec(IxDyn(&[2, 4]), vec![nan, nan, nan, nan, 1.0, nan, 0.5, 3.0])
        .unwrap();
    let x = split(&data, &[1, 2]);
    let reductions = Reductions::default();
    let options = ReductionOptions::new().axes(Axes::One(1)).fan_in(FanIn::Budget(2));

    let nanargmin = executor()
        .compute(&reductions.nanargmin(&x, &options).unwrap())
        .unwrap()
        .into_int()
        .unwrap();
    assert_eq!(nanargmin.iter().copied().collect::<Vec<_>>(), vec![-1, 2]);

    let nanmean = evaluate(&reductions.nanmean(&x, &options).unwrap());
    assert!(nanmean[[0]].is_nan());
    assert_relative_eq!(nanmean[[1]], 1.5);

    let nanmax = evaluate(&reductions.nanmax(&x, &options).unwrap());
    assert!(nanmax[[0]].is_nan());
    assert_eq!(nanmax[[1]], 3.0);
}

#[test]
fn test_vector_norms() {
    let data = arr1(&[3.0, -4.0, 0.0, 12.0, -1.0]).into_dyn();
    let x = split(&data, &[2]);
    let reductions = Reductions::default();
    let options = ReductionOptions::new().fan_in(FanIn::Budget(2));
    let norm = |order| evaluate(&reductions.vnorm(&x, order, &options).unwrap())[[]];

    assert_relative_eq!(norm(NormOrder::Fro), 170.0_f64.sqrt(), epsilon = 1e-12);
    assert_relative_eq!(norm(NormOrder::P(2.0)), 170.0_f64.sqrt(), epsilon = 1e-12);
    assert_eq!(norm(NormOrder::Inf), 12.0);
    assert_eq!(norm(NormOrder::NegInf), 0.0);
    assert_eq!(norm(NormOrder::P(1.0)), 20.0);
    let cubes: f64 = 27.0 + 64.0 + 1728.0 + 1.0;
    assert_relative_eq!(norm(NormOrder::P(3.0)), cubes.cbrt(), epsilon = 1e-12);
    assert_relative_eq!(
        norm(NormOrder::P(4.0)),
        (81.0_f64 + 256.0 + 20736.0 + 1.0).powf(0.25),
        epsilon = 1e-12
    );
}

#[test]
fn test_dtype_override_applies_after_final_transform() {
    let x = ChunkedArray::from_array(
        arr1(&[2.02, 0.0]).into_dyn(),
        Chunks::regular(&[2], &[1]).unwrap(),
    )
    .unwrap();
    let reductions = Reductions::default();
    let as_int = ReductionOptions::new().dtype(chunk_reduce::DType::Int64);

    // 2.02^2.5 is about 5.8; truncating before the root would give 5^0.4 < 2
    let norm = executor()
        .compute(&reductions.vnorm(&x, NormOrder::P(2.5), &as_int).unwrap())
        .unwrap();
    assert_eq!(norm, Block::Int(ArrayD::from_elem(IxDyn(&[]), 2)));

    let std = executor().compute(&reductions.std(&x, &as_int).unwrap()).unwrap();
    assert_eq!(std, Block::Int(ArrayD::from_elem(IxDyn(&[]), 1)));
}

#[test]
fn test_integer_and_boolean_inputs() {
    let ints = Block::Int(Array::from_shape_vec(IxDyn(&[5]), vec![2, -7, 3, 3, 1]).unwrap());
    let x = ChunkedArray::from_block(ints, Chunks::regular(&[5], &[2]).unwrap()).unwrap();
    let reductions = Reductions::default();
    let options = ReductionOptions::new().fan_in(FanIn::Budget(2));

    let sum = executor().compute(&reductions.sum(&x, &options).unwrap()).unwrap();
    assert_eq!(sum, Block::Int(ArrayD::from_elem(IxDyn(&[]), 2)));

    let min = executor().compute(&reductions.min(&x, &options).unwrap()).unwrap();
    assert_eq!(min, Block::Int(ArrayD::from_elem(IxDyn(&[]), -7)));

    let mean = evaluate(&reductions.mean(&x, &options).unwrap());
    assert_relative_eq!(mean[[]], 0.4);

    let flags = Block::Bool(
        Array::from_shape_vec(IxDyn(&[4]), vec![false, true, false, false]).unwrap(),
    );
    let b = ChunkedArray::from_block(flags, Chunks::regular(&[4], &[1]).unwrap()).unwrap();
    let any = executor().compute(&reductions.any(&b, &options).unwrap()).unwrap();
    let all = executor().compute(&reductions.all(&b, &options).unwrap()).unwrap();
    let count = executor().compute(&reductions.sum(&b, &options).unwrap()).unwrap();
    assert_eq!(any, Block::Bool(ArrayD::from_elem(IxDyn(&[]), true)));
    assert_eq!(all, Block::Bool(ArrayD::from_elem(IxDyn(&[]), false)));
    assert_eq!(count, Block::Int(ArrayD::from_elem(IxDyn(&[]), 1)));
}

#[test]
fn test_partial_reduce_directly() {
    use chunk_reduce::primitives::Primitive;
    use chunk_reduce::statistics::BlockFn;

    let data = table();
    let x = split(&data, &[1, 10]);
    let fan_in = FanInMap::from([(0, 4)]);
    let sum = BlockFn::Primitive(Primitive::Sum);

    let chunked = chunk_reduce::map_chunks(&x, sum, &Axes::One(0).normalize(2).unwrap()).unwrap();
    let level = chunk_reduce::partial_reduce(sum, &chunked, &fan_in, true, None, Some("rows")).unwrap();
    assert!(level.name().starts_with("rows-"));
    assert_eq!(level.numblocks(), vec![2, 1]);

    let partial = executor().compute(&level).unwrap().into_float().unwrap();
    assert_eq!(partial.shape(), &[2, 10]);
    let head = data.slice(ndarray::s![0..4, ..]).sum_axis(Axis(0)).into_dyn();
    assert_eq!(partial.index_axis(Axis(0), 0), head);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_split_invariance(
        values in prop::collection::vec(-100.0_f64..100.0, 1..40),
        block in 1_usize..9,
        budget in 2_usize..5,
    ) {
        let len = values.len();
        let data = Array::from(values.clone()).into_dyn();
        let x = split(&data, &[block.min(len)]);
        let reductions = Reductions::default();
        let options = ReductionOptions::new().fan_in(FanIn::Budget(budget));

        let n = len as f64;
        let mean = values.iter().sum::<f64>() / n;
        let scale = values.iter().map(|v| (v - mean).abs()).fold(1.0, f64::max);

        let got = evaluate(&reductions.mean(&x, &options).unwrap())[[]];
        prop_assert!((got - mean).abs() <= 1e-9 * (1.0 + mean.abs()));

        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let got = evaluate(&reductions.var(&x, &options).unwrap())[[]];
        prop_assert!((got - var).abs() <= 1e-9 * scale.powi(2));

        let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;
        let got = evaluate(&reductions.moment(&x, 3, &options).unwrap())[[]];
        prop_assert!((got - m3).abs() <= 1e-9 * scale.powi(3));

        let argmax = executor()
            .compute(&reductions.argmax(&x, &options).unwrap())
            .unwrap()
            .into_int()
            .unwrap();
        prop_assert_eq!(argmax[[]], first_extreme(&values, true));

        let argmin = executor()
            .compute(&reductions.argmin(&x, &options).unwrap())
            .unwrap()
            .into_int()
            .unwrap();
        prop_assert_eq!(argmin[[]], first_extreme(&values, false));
    }
}
