// Tensor and Value tests — the untracked arithmetic custom functions use in
// their bodies, typed construction, in-place writes and argument tags.

use gradwright::prelude::*;

type T = CpuTensor;
const DEV: CpuDevice = CpuDevice;

fn t(data: &[f64]) -> T {
    T::from_f64_slice(data, data.len(), DType::F64, &DEV).unwrap()
}

// Arithmetic

#[test]
fn test_sub_div_neg() {
    let a = t(&[6.0, 8.0, -1.0]);
    let b = t(&[2.0, 4.0, 4.0]);
    assert_eq!(a.sub(&b).unwrap().to_f64_vec().unwrap(), vec![4.0, 4.0, -5.0]);
    assert_eq!(a.div(&b).unwrap().to_f64_vec().unwrap(), vec![3.0, 2.0, -0.25]);
    assert_eq!(a.neg().unwrap().to_f64_vec().unwrap(), vec![-6.0, -8.0, 1.0]);
}

#[test]
fn test_binary_shape_mismatch() {
    let a = t(&[1.0, 2.0]);
    let b = t(&[1.0, 2.0, 3.0]);
    let err = a.sub(&b).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
}

#[test]
fn test_arithmetic_records_no_history() {
    let a = t(&[1.0]).requires_grad_(true).unwrap();
    let b = a.neg().unwrap();
    assert!(b.grad_fn().is_none());
    assert!(!b.requires_grad());
}

// Construction

#[test]
fn test_from_slice_takes_dtype_from_type() {
    let a = T::from_slice(&[1.5f32, -2.0], 2, &DEV).unwrap();
    assert_eq!(a.dtype(), DType::F32);
    assert_eq!(a.to_f64_vec().unwrap(), vec![1.5, -2.0]);

    let b = T::from_slice(&[3i64, 4, 5, 6], (2, 2), &DEV).unwrap();
    assert_eq!(b.dtype(), DType::I64);
    assert_eq!(b.dims(), &[2, 2]);
    assert_eq!(b.to_f64_vec().unwrap(), vec![3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn test_from_slice_element_count() {
    let err = T::from_slice(&[1u8, 2, 3], (2, 2), &DEV).unwrap_err();
    assert!(
        matches!(err, Error::ElementCountMismatch { expected: 4, got: 3, .. }),
        "{err}"
    );
}

#[test]
fn test_integer_tensor_cannot_require_grad() {
    let a = T::from_slice(&[1u32, 2], 2, &DEV).unwrap();
    assert!(a.requires_grad_(true).is_err());
}

// In-place writes

#[test]
fn test_update_data_inplace_bumps_shared_version() {
    let a = t(&[1.0, 2.0]);
    let alias = a.detach();
    assert_ne!(alias.id(), a.id());

    a.update_data_inplace(&[5.0, 7.0]).unwrap();
    assert_eq!(a.version(), 1);
    assert_eq!(alias.version(), 1);
    assert_eq!(alias.to_f64_vec().unwrap(), vec![5.0, 7.0]);
}

#[test]
fn test_update_data_inplace_checks_length() {
    let a = t(&[1.0, 2.0]);
    let err = a.update_data_inplace(&[1.0]).unwrap_err();
    assert!(matches!(err, Error::ElementCountMismatch { .. }), "{err}");
    assert_eq!(a.version(), 0);
}

// Value tags

#[test]
fn test_value_accessors() {
    let x = t(&[1.0]);
    let args: Vec<Value<CpuBackend>> = values![&x, true, 3i64, 2.5, "s", None::<f64>];

    assert!(args[0].is_tensor());
    assert!(!args[1].is_tensor());
    assert_eq!(args[1].as_bool(), Some(true));
    assert_eq!(args[2].as_bool(), None);
    assert_eq!(args[2].as_int(), Some(3));
    assert_eq!(args[2].as_float(), Some(3.0));
    assert_eq!(args[3].as_int(), None);
    assert_eq!(args[4].as_str(), Some("s"));
    assert_eq!(args[5].kind(), "none");
}

#[test]
fn test_value_list() {
    let x = t(&[1.0]);
    let list = Value::from(values![&x, 1.0]);
    let items = list.as_list().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_tensor().unwrap().id(), x.id());
    // a list is opaque to autograd even when it holds tensors
    assert!(!list.is_tensor());
    assert_eq!(list.kind(), "list");
    assert!(Value::<CpuBackend>::from(1.0).as_list().is_none());
}
