use graphc::shape::{find_permutation, DType, DynamicDimension, Shape};
use graphc::Error;
use proptest::prelude::*;
use test_case::test_case;

#[test_case(DType::Bool, "bool", 1; "bool")]
#[test_case(DType::I8, "int8", 1; "int8")]
#[test_case(DType::I32, "int32", 4; "int32")]
#[test_case(DType::U64, "uint64", 8; "uint64")]
#[test_case(DType::F32, "float", 4; "float")]
#[test_case(DType::F64, "double", 8; "double")]
fn dtype_names_and_sizes(dtype: DType, name: &str, size: usize) {
    assert_eq!(dtype.name(), name);
    assert_eq!(dtype.size_in_bytes(), size);
}

#[test]
fn standard_shape_has_row_major_strides() -> anyhow::Result<()> {
    let s = Shape::new(DType::F32, [2, 3, 4]);
    assert_eq!(s.lens()?, &[2, 3, 4]);
    assert_eq!(s.strides()?, &[12, 4, 1]);
    assert!(s.standard());
    assert!(s.packed());
    assert!(!s.transposed());
    assert!(!s.broadcasted());
    assert_eq!(s.elements()?, 24);
    assert_eq!(s.bytes()?, 96);
    Ok(())
}

#[test]
fn transposed_shape_is_packed_but_not_standard() -> anyhow::Result<()> {
    let s = Shape::with_strides(DType::F32, [3, 2], [1, 3])?;
    assert!(s.packed());
    assert!(s.transposed());
    assert!(!s.standard());
    Ok(())
}

#[test]
fn zero_stride_axis_is_broadcast() -> anyhow::Result<()> {
    let s = Shape::with_strides(DType::F32, [2, 3], [0, 1])?;
    assert!(s.broadcasted());
    assert!(!s.packed());
    assert!(!s.standard());
    assert_eq!(s.element_space()?, 3);
    Ok(())
}

#[test]
fn unit_axes_are_ignored_by_the_standard_check() -> anyhow::Result<()> {
    let s = Shape::with_strides(DType::F32, [2, 1, 3], [3, 7, 1])?;
    assert!(s.standard());
    let normalized = s.normalize_standard();
    assert_eq!(normalized.strides()?, &[3, 3, 1]);
    assert_eq!(normalized, Shape::new(DType::F32, [2, 1, 3]));
    Ok(())
}

#[test]
fn mismatched_lens_and_strides_are_rejected() {
    assert!(Shape::with_strides(DType::F32, [2, 3], [1]).is_err());
}

#[test]
fn scalar_shape_aliases_one_element() -> anyhow::Result<()> {
    let s = Shape::scalar_of(DType::I64);
    assert!(s.scalar());
    assert!(s.standard());
    assert_eq!(s.elements()?, 1);
    Ok(())
}

#[test]
fn dynamic_shape_refuses_static_queries() {
    let s = Shape::dynamic(
        DType::F32,
        [DynamicDimension::new(1, 8), DynamicDimension::fixed(4)],
    );
    assert!(s.is_dynamic());
    assert!(matches!(s.lens(), Err(Error::InvalidState(_))));
    assert!(matches!(s.strides(), Err(Error::InvalidState(_))));
    assert!(matches!(s.elements(), Err(Error::InvalidState(_))));
    assert_eq!(s.min_lens(), vec![1, 4]);
    assert_eq!(s.max_lens(), vec![8, 4]);
}

#[test]
fn to_static_fixes_open_axes() -> anyhow::Result<()> {
    let s = Shape::dynamic(
        DType::F32,
        [
            DynamicDimension::new(1, 8).with_optimals([2, 4]),
            DynamicDimension::fixed(3),
        ],
    );
    assert_eq!(s.to_static(5).lens()?, &[5, 3]);
    assert_eq!(s.opt_lens(), vec![2, 3]);
    Ok(())
}

#[test]
fn with_lens_keeps_memory_axis_order() -> anyhow::Result<()> {
    let s = Shape::from_permutation(DType::F32, &[2, 3, 4], &[2, 0, 1]);
    assert_eq!(find_permutation(&s)?, vec![2, 0, 1]);
    let resized = s.with_lens(&[4, 5, 6])?;
    assert_eq!(resized.lens()?, &[4, 5, 6]);
    assert_eq!(find_permutation(&resized)?, vec![2, 0, 1]);
    assert!(resized.packed());
    Ok(())
}

#[test]
fn index_and_multi_agree_on_standard_shapes() -> anyhow::Result<()> {
    let s = Shape::new(DType::F32, [2, 3]);
    assert_eq!(s.multi(4)?, vec![1, 1]);
    assert_eq!(s.index(&[1, 1])?, 4);
    Ok(())
}

#[test]
fn tuple_shape_lists_sub_shapes() -> anyhow::Result<()> {
    let a = Shape::new(DType::F32, [2]);
    let b = Shape::new(DType::I32, [3]);
    let t = Shape::tuple(vec![a.clone(), b.clone()]);
    assert!(t.is_tuple());
    assert_eq!(t.dtype(), DType::Tuple);
    assert_eq!(t.sub_shapes(), &[a, b]);
    assert_eq!(t.bytes()?, 8 + 12);
    assert!(t.lens().is_err());
    Ok(())
}

#[test]
fn display_lists_type_lens_and_strides() {
    let s = Shape::new(DType::F32, [2, 3]);
    assert_eq!(s.to_string(), "float, {2, 3}, {3, 1}");
}

#[test]
fn shapes_survive_json() -> anyhow::Result<()> {
    let shapes = [
        Shape::with_strides(DType::F32, [3, 2], [1, 3])?,
        Shape::dynamic(DType::I64, [DynamicDimension::new(1, 4).with_optimals([2])]),
        Shape::tuple(vec![Shape::new(DType::Bool, [1]), Shape::new(DType::F64, [2, 2])]),
    ];
    for shape in shapes {
        let json = serde_json::to_string(&shape)?;
        let back: Shape = serde_json::from_str(&json)?;
        assert_eq!(back, shape, "{json}");
    }
    Ok(())
}

#[test]
fn rank_zero_dynamic_shape_stays_dynamic_through_json() -> anyhow::Result<()> {
    let shape = Shape::dynamic(DType::F32, Vec::<DynamicDimension>::new());
    let json = serde_json::to_string(&shape)?;
    let back: Shape = serde_json::from_str(&json)?;
    assert!(back.is_dynamic(), "{json}");
    assert_eq!(back, shape);

    let fixed: Shape = serde_json::from_str(r#"{"type":"f32"}"#)?;
    assert!(!fixed.is_dynamic());
    Ok(())
}

fn static_shape() -> impl Strategy<Value = Shape> {
    prop::collection::vec(1usize..6, 1..5).prop_flat_map(|lens| {
        let rank = lens.len();
        (Just(lens), Just((0..rank).collect::<Vec<_>>()).prop_shuffle())
            .prop_map(|(lens, perm)| Shape::from_permutation(DType::F32, &lens, &perm))
    })
}

proptest! {
    #[test]
    fn static_shape_rebuilds_from_its_parts(shape in static_shape()) {
        let rebuilt = Shape::with_strides(
            shape.dtype(),
            shape.lens().unwrap().to_vec(),
            shape.strides().unwrap().to_vec(),
        )
        .unwrap();
        prop_assert_eq!(&rebuilt, &shape);
    }

    #[test]
    fn dynamic_round_trip_keeps_lens(shape in static_shape(), default_len in 1usize..10) {
        let back = shape.to_dynamic().to_static(default_len);
        prop_assert_eq!(back.lens().unwrap(), shape.lens().unwrap());
    }
}
