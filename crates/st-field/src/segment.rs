// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! CSR segment reductions.
//!
//! `src` is a stack of feature vectors along axis 0 and `indptr` delimits
//! groups: group `i` covers rows `indptr[i]..indptr[i + 1]`. Empty groups
//! aggregate to zero for both reductions, so a mean never divides by zero.

use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayD, Axis, IxDyn, Slice};

use crate::error::{FieldError, FieldResult};
use crate::field::Field;

/// Aggregation applied to every CSR group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentReduce {
    Sum,
    Mean,
}

impl FromStr for SegmentReduce {
    type Err = FieldError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sum" => Ok(SegmentReduce::Sum),
            "mean" => Ok(SegmentReduce::Mean),
            other => Err(FieldError::InvalidArgument(format!(
                "reduce must be 'sum' or 'mean', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SegmentReduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentReduce::Sum => f.write_str("sum"),
            SegmentReduce::Mean => f.write_str("mean"),
        }
    }
}

fn validate_indptr(indptr: &[usize], rows: usize) -> FieldResult<()> {
    if indptr.is_empty() {
        return Err(FieldError::InvalidArgument(
            "indptr must contain at least one offset".into(),
        ));
    }
    if let Some(window) = indptr.windows(2).find(|w| w[1] < w[0]) {
        return Err(FieldError::InvalidArgument(format!(
            "indptr must be non-decreasing, found {} followed by {}",
            window[0], window[1]
        )));
    }
    let last = indptr[indptr.len() - 1];
    if last > rows {
        return Err(FieldError::InvalidArgument(format!(
            "indptr ends at {last} but src has {rows} rows"
        )));
    }
    Ok(())
}

/// Reduces the CSR groups of `src` into a `[indptr.len() - 1, ...]` field.
pub fn segment_csr(src: &Field, indptr: &[usize], reduce: SegmentReduce) -> FieldResult<Field> {
    let rows = src.dim(0)?;
    validate_indptr(indptr, rows)?;

    let groups = indptr.len() - 1;
    let mut shape = src.shape().to_vec();
    shape[0] = groups;
    let mut out = ArrayD::<f32>::zeros(IxDyn(&shape));
    let data = src.as_array();

    for (group, bounds) in indptr.windows(2).enumerate() {
        let (start, end) = (bounds[0], bounds[1]);
        if start == end {
            continue;
        }
        let aggregate = data
            .slice_axis(Axis(0), Slice::from(start..end))
            .sum_axis(Axis(0));
        let mut target = out.index_axis_mut(Axis(0), group);
        match reduce {
            SegmentReduce::Sum => target.assign(&aggregate),
            SegmentReduce::Mean => {
                let count = (end - start) as f32;
                target.assign(&aggregate.mapv(|v| v / count));
            }
        }
    }
    Ok(Field::from_array(out))
}

/// String-mode entry point; unknown modes fail with `InvalidArgument`.
pub fn segment_csr_by_name(src: &Field, indptr: &[usize], reduce: &str) -> FieldResult<Field> {
    segment_csr(src, indptr, reduce.parse()?)
}
