// ============================================================
// Layer 3 — Host Arrays
// ============================================================
// Every record read from a dump file, every filtered sample
// and every cache entry is an ndarray `ArrayD`:
//
//   Values = ArrayD<f32>    inputs, outputs, raw masks
//   Mask   = ArrayD<bool>   masks after "non-zero = valid"
//
// Burn tensors only appear at collation time (Layer 4
// batcher), so everything up to that point stays testable
// without a backend.
//
// The helpers below are the few sequence operations the
// extractor needs with a DataError instead of a panic when a
// dump has an unexpected shape.

use ndarray::{ArrayD, Axis, Slice};

use crate::domain::error::DataError;

pub type Values = ArrayD<f32>;
pub type Mask = ArrayD<bool>;

fn check_axis<T>(array: &ArrayD<T>, axis: usize) -> Result<(), DataError> {
    if axis >= array.ndim() {
        return Err(DataError::Shape(format!(
            "axis {} does not exist in shape {:?}",
            axis,
            array.shape()
        )));
    }
    Ok(())
}

/// Size of axis 0 (batch axis of a record, sequence axis of a
/// sequence-major sample). 0 for a scalar.
pub fn leading<T>(array: &ArrayD<T>) -> usize {
    array.shape().first().copied().unwrap_or(0)
}

/// Number of elements in one slice along axis 0.
pub fn row_width<T>(array: &ArrayD<T>) -> usize {
    array.shape().iter().skip(1).product()
}

/// Entry `index` along `axis`, with that axis removed.
pub fn select<T: Clone>(array: &ArrayD<T>, axis: usize, index: usize) -> Result<ArrayD<T>, DataError> {
    check_axis(array, axis)?;
    if index >= array.len_of(Axis(axis)) {
        return Err(DataError::Shape(format!(
            "index {} out of bounds for axis {} of shape {:?}",
            index,
            axis,
            array.shape()
        )));
    }
    Ok(array.index_axis(Axis(axis), index).to_owned())
}

/// The first `len` entries along `axis`; cuts dump padding away.
pub fn narrow<T: Clone>(array: &ArrayD<T>, axis: usize, len: usize) -> Result<ArrayD<T>, DataError> {
    check_axis(array, axis)?;
    if len > array.len_of(Axis(axis)) {
        return Err(DataError::Shape(format!(
            "cannot narrow axis {} of shape {:?} to length {}",
            axis,
            array.shape(),
            len
        )));
    }
    Ok(array.slice_axis(Axis(axis), Slice::from(..len)).to_owned())
}

/// Drop `axis` if it has size 1, otherwise return the array unchanged.
pub fn squeeze<T>(array: ArrayD<T>, axis: usize) -> ArrayD<T> {
    if array.shape().get(axis) == Some(&1) {
        array.index_axis_move(Axis(axis), 0)
    } else {
        array
    }
}

/// Non-zero means "real token".
pub fn to_mask(values: &Values) -> Mask {
    values.mapv(|v| v != 0.0)
}

/// Valid-token count of every lane along the last axis: one count
/// for a `[T]` mask, one per row for a `[T, T]` mask.
pub fn valid_counts(mask: &Mask) -> Vec<usize> {
    if mask.ndim() == 0 {
        return Vec::new();
    }
    let last = Axis(mask.ndim() - 1);
    mask.lanes(last)
        .into_iter()
        .map(|lane| lane.iter().filter(|&&v| v).count())
        .collect()
}
