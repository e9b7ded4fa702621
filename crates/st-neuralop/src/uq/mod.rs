// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod conformal;
pub mod processor;

pub use conformal::{
    calibrate, calibration_sweep, collect_calibration_ratios, eval_coverage_bandwidth,
    get_coeff_quantile_idx, CalibrationRatios, CoverageReport, QuantilePlan, SweepRecord,
};
pub use processor::UqnoDataProcessor;
