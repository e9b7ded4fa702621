// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Dense real-valued field tensors.
//!
//! A [`Field`] is an `ndarray::ArrayD<f32>` with a fixed axis convention: a
//! leading batch axis, a channel axis and one or more spatial (or temporal)
//! axes. The helpers here are the small set of tensor primitives the neural
//! operators need: elementwise arithmetic with broadcasting, axis surgery
//! (move, insert, index, narrow, pad) and channel-wise linear maps.

use ndarray::{
    concatenate, stack, Array2, ArrayD, ArrayView1, ArrayView2, ArrayViewD, Axis, Dimension, IxDyn,
    Slice, Zip,
};

use crate::error::{FieldError, FieldResult};

/// Owned N-dimensional `f32` field.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    data: ArrayD<f32>,
}

impl Field {
    /// Wraps an existing array.
    pub fn from_array(data: ArrayD<f32>) -> Self {
        Self { data }
    }

    /// Builds a field from a row-major buffer.
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> FieldResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(FieldError::DataLength {
                expected,
                got: data.len(),
            });
        }
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Self::from_array)
            .map_err(|err| FieldError::InvalidArgument(err.to_string()))
    }

    /// Field of zeros with the requested shape.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::from_array(ArrayD::zeros(IxDyn(shape)))
    }

    /// Field filled with a constant.
    pub fn full(shape: &[usize], value: f32) -> Self {
        Self::from_array(ArrayD::from_elem(IxDyn(shape), value))
    }

    /// Field whose entries are produced from their multi-index.
    pub fn from_shape_fn<F>(shape: &[usize], mut f: F) -> Self
    where
        F: FnMut(&[usize]) -> f32,
    {
        Self::from_array(ArrayD::from_shape_fn(IxDyn(shape), |index| {
            f(index.slice())
        }))
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_array(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn into_array(self) -> ArrayD<f32> {
        self.data
    }

    pub fn view(&self) -> ArrayViewD<'_, f32> {
        self.data.view()
    }

    /// Flattens into a row-major buffer.
    pub fn into_vec(self) -> Vec<f32> {
        if self.data.is_standard_layout() {
            self.data.into_raw_vec()
        } else {
            self.data.iter().copied().collect()
        }
    }

    /// Copies the values in logical (row-major) order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// Size of `axis`, validated against the rank.
    pub fn dim(&self, axis: usize) -> FieldResult<usize> {
        self.check_axis(axis)?;
        Ok(self.data.len_of(Axis(axis)))
    }

    fn check_axis(&self, axis: usize) -> FieldResult<()> {
        if axis >= self.ndim() {
            return Err(FieldError::AxisOutOfRange {
                axis,
                rank: self.ndim(),
            });
        }
        Ok(())
    }

    fn ensure_same_shape(&self, other: &Field) -> FieldResult<()> {
        if self.shape() != other.shape() {
            return Err(FieldError::shape(self.shape(), other.shape()));
        }
        Ok(())
    }

    /// Combines two equally shaped fields entry by entry.
    pub fn zip_with(&self, other: &Field, f: impl Fn(f32, f32) -> f32) -> FieldResult<Field> {
        self.ensure_same_shape(other)?;
        let mut out = self.data.clone();
        Zip::from(&mut out)
            .and(&other.data)
            .for_each(|lhs, &rhs| *lhs = f(*lhs, rhs));
        Ok(Field::from_array(out))
    }

    /// Combines `self` with `other` broadcast to `self`'s shape.
    pub fn zip_broadcast(&self, other: &ArrayD<f32>, f: impl Fn(f32, f32) -> f32) -> FieldResult<Field> {
        let rhs = other
            .broadcast(self.data.raw_dim())
            .ok_or_else(|| FieldError::shape(self.shape(), other.shape()))?;
        let mut out = self.data.clone();
        Zip::from(&mut out)
            .and(&rhs)
            .for_each(|lhs, &rhs| *lhs = f(*lhs, rhs));
        Ok(Field::from_array(out))
    }

    pub fn add(&self, other: &Field) -> FieldResult<Field> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Field) -> FieldResult<Field> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Field) -> FieldResult<Field> {
        self.zip_with(other, |a, b| a * b)
    }

    /// In-place accumulation used by residual connections.
    pub fn add_assign(&mut self, other: &Field) -> FieldResult<()> {
        self.ensure_same_shape(other)?;
        self.data += &other.data;
        Ok(())
    }

    pub fn scale(&self, factor: f32) -> Field {
        Field::from_array(self.data.mapv(|v| v * factor))
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Field {
        Field::from_array(self.data.mapv(f))
    }

    pub fn abs(&self) -> Field {
        self.map(f32::abs)
    }

    pub fn sum(&self) -> f32 {
        self.data.sum()
    }

    /// Arithmetic mean, `None` for an empty field.
    pub fn mean(&self) -> Option<f32> {
        self.data.mean()
    }

    /// Returns `true` when every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Adds a singleton axis at `axis` (`axis == ndim` appends).
    pub fn insert_axis(&self, axis: usize) -> FieldResult<Field> {
        if axis > self.ndim() {
            return Err(FieldError::AxisOutOfRange {
                axis,
                rank: self.ndim(),
            });
        }
        Ok(Field::from_array(self.data.clone().insert_axis(Axis(axis))))
    }

    /// Selects one slice along `axis`, dropping that axis.
    pub fn index_axis(&self, axis: usize, index: usize) -> FieldResult<Field> {
        let size = self.dim(axis)?;
        if index >= size {
            return Err(FieldError::InvalidArgument(format!(
                "index {index} out of bounds for axis {axis} of size {size}"
            )));
        }
        Ok(Field::from_array(
            self.data.index_axis(Axis(axis), index).to_owned(),
        ))
    }

    /// Moves `source` to position `destination`, keeping the relative order of the rest.
    pub fn move_axis(&self, source: usize, destination: usize) -> FieldResult<Field> {
        self.check_axis(source)?;
        self.check_axis(destination)?;
        if source == destination {
            return Ok(self.clone());
        }
        let mut order: Vec<usize> = (0..self.ndim()).filter(|&axis| axis != source).collect();
        order.insert(destination, source);
        let permuted = self.data.clone().permuted_axes(IxDyn(&order));
        Ok(Field::from_array(permuted.as_standard_layout().into_owned()))
    }

    /// Keeps `len` entries of `axis` starting at `start`.
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> FieldResult<Field> {
        let size = self.dim(axis)?;
        if start + len > size {
            return Err(FieldError::InvalidArgument(format!(
                "narrow {start}..{} exceeds axis {axis} of size {size}",
                start + len
            )));
        }
        Ok(Field::from_array(
            self.data
                .slice_axis(Axis(axis), Slice::from(start..start + len))
                .to_owned(),
        ))
    }

    /// Zero-pads `axis` with `before` leading and `after` trailing entries.
    pub fn pad_axis(&self, axis: usize, before: usize, after: usize) -> FieldResult<Field> {
        let size = self.dim(axis)?;
        if before == 0 && after == 0 {
            return Ok(self.clone());
        }
        let mut shape = self.shape().to_vec();
        shape[axis] = size + before + after;
        let mut out = ArrayD::zeros(IxDyn(&shape));
        out.slice_axis_mut(Axis(axis), Slice::from(before..before + size))
            .assign(&self.data);
        Ok(Field::from_array(out))
    }

    /// Stacks equally shaped fields along a new axis.
    pub fn stack(fields: &[Field], axis: usize) -> FieldResult<Field> {
        let first = fields
            .first()
            .ok_or_else(|| FieldError::InvalidArgument("cannot stack an empty list".into()))?;
        if axis > first.ndim() {
            return Err(FieldError::AxisOutOfRange {
                axis,
                rank: first.ndim(),
            });
        }
        for field in &fields[1..] {
            first.ensure_same_shape(field)?;
        }
        let views: Vec<ArrayViewD<'_, f32>> = fields.iter().map(|f| f.data.view()).collect();
        stack(Axis(axis), &views)
            .map(Field::from_array)
            .map_err(|err| FieldError::InvalidArgument(err.to_string()))
    }

    /// Concatenates fields along an existing axis.
    pub fn concat(fields: &[Field], axis: usize) -> FieldResult<Field> {
        let first = fields
            .first()
            .ok_or_else(|| FieldError::InvalidArgument("cannot concatenate an empty list".into()))?;
        first.check_axis(axis)?;
        for field in &fields[1..] {
            let mut expected = first.shape().to_vec();
            expected[axis] = field.shape().get(axis).copied().unwrap_or(0);
            if field.shape() != expected.as_slice() {
                return Err(FieldError::shape(&expected, field.shape()));
            }
        }
        let views: Vec<ArrayViewD<'_, f32>> = fields.iter().map(|f| f.data.view()).collect();
        concatenate(Axis(axis), &views)
            .map(Field::from_array)
            .map_err(|err| FieldError::InvalidArgument(err.to_string()))
    }

    /// Applies `weight` (`out × in`) and an optional bias along `axis`.
    ///
    /// This is the 1×1 convolution used for lifting, projection and skip
    /// connections; with `axis = ndim - 1` it is a dense layer over the last axis.
    pub fn channel_linear(
        &self,
        weight: ArrayView2<'_, f32>,
        bias: Option<ArrayView1<'_, f32>>,
        axis: usize,
    ) -> FieldResult<Field> {
        let channels = self.dim(axis)?;
        let (out_features, in_features) = weight.dim();
        if channels != in_features {
            return Err(FieldError::ShapeMismatch {
                expected: vec![in_features],
                got: vec![channels],
            });
        }
        if let Some(bias) = bias {
            if bias.len() != out_features {
                return Err(FieldError::ShapeMismatch {
                    expected: vec![out_features],
                    got: vec![bias.len()],
                });
            }
        }
        let last = self.ndim() - 1;
        let moved = self.move_axis(axis, last)?;
        let mut shape = moved.shape().to_vec();
        let rows = if in_features == 0 { 0 } else { moved.len() / in_features };
        let flat = Array2::from_shape_vec((rows, in_features), moved.into_vec())
            .map_err(|err| FieldError::InvalidArgument(err.to_string()))?;
        let mut out = flat.dot(&weight.t());
        if let Some(bias) = bias {
            out += &bias;
        }
        shape[last] = out_features;
        Field::from_shape_vec(&shape, out.into_raw_vec())?.move_axis(last, axis)
    }

    /// Views the field as `(batch, rest)` rows, one row per leading-axis entry.
    pub fn batch_rows(&self) -> FieldResult<Array2<f32>> {
        let batch = self.dim(0)?;
        if batch == 0 {
            return Err(FieldError::InvalidArgument("field has an empty batch axis".into()));
        }
        let rest = self.len() / batch;
        Array2::from_shape_vec((batch, rest), self.to_vec())
            .map_err(|err| FieldError::InvalidArgument(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn move_axis_matches_channel_last_convention() {
        let field = Field::from_shape_fn(&[2, 3, 4], |idx| (idx[0] * 100 + idx[1] * 10 + idx[2]) as f32);
        let moved = field.move_axis(1, 2).unwrap();
        assert_eq!(moved.shape(), &[2, 4, 3]);
        assert_eq!(moved.as_array()[[1, 3, 2]], 123.0);
        let back = moved.move_axis(2, 1).unwrap();
        assert_eq!(back, field);
    }

    #[test]
    fn pad_then_narrow_restores_field() {
        let field = Field::from_shape_fn(&[1, 2, 5], |idx| idx[2] as f32 + 1.0);
        let padded = field.pad_axis(2, 2, 1).unwrap();
        assert_eq!(padded.shape(), &[1, 2, 8]);
        assert_eq!(padded.as_array()[[0, 0, 0]], 0.0);
        assert_eq!(padded.as_array()[[0, 0, 2]], 1.0);
        assert_eq!(padded.narrow(2, 2, 5).unwrap(), field);
    }

    #[test]
    fn channel_linear_mixes_selected_axis() {
        let field = Field::from_shape_vec(&[1, 2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let weight = array![[1.0, 1.0], [2.0, -1.0]];
        let bias = Array1::from(vec![0.5, 0.0]);
        let out = field.channel_linear(weight.view(), Some(bias.view()), 1).unwrap();
        assert_eq!(out.shape(), &[1, 2, 3]);
        assert_eq!(out.to_vec(), vec![5.5, 7.5, 9.5, -2.0, -1.0, 0.0]);
    }

    #[test]
    fn channel_linear_rejects_wrong_width() {
        let field = Field::zeros(&[1, 3, 4]);
        let weight = Array2::<f32>::zeros((2, 2));
        let err = field.channel_linear(weight.view(), None, 1).unwrap_err();
        assert!(matches!(err, FieldError::ShapeMismatch { .. }));
    }

    #[test]
    fn stack_and_index_axis_are_inverse() {
        let a = Field::full(&[2, 3], 1.0);
        let b = Field::full(&[2, 3], 2.0);
        let stacked = Field::stack(&[a.clone(), b.clone()], 1).unwrap();
        assert_eq!(stacked.shape(), &[2, 2, 3]);
        assert_eq!(stacked.index_axis(1, 0).unwrap(), a);
        assert_eq!(stacked.index_axis(1, 1).unwrap(), b);
        assert!(Field::stack(&[], 0).is_err());
    }

    #[test]
    fn broadcast_zip_expands_singleton_axes() {
        let field = Field::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let row = Field::from_shape_vec(&[1, 2], vec![10.0, 20.0]).unwrap();
        let out = field.zip_broadcast(row.as_array(), |a, b| a + b).unwrap();
        assert_eq!(out.to_vec(), vec![11.0, 22.0, 13.0, 24.0]);
        let bad = Field::zeros(&[3]);
        assert!(field.zip_broadcast(bad.as_array(), |a, b| a + b).is_err());
    }
}
