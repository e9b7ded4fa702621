// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::sync::Arc;

use tracing::debug;

use crate::data::{DataProcessor, Normalizer, Sample};
use crate::models::Uqno;
use crate::{Field, FieldError, FieldResult};

/// Turns `(solution, uncertainty)` model outputs into the pair a quantile
/// loss or a calibration pass consumes: the decoded uncertainty and a sample
/// whose `y` is the true residual `g_true − g_hat`.
#[derive(Debug)]
pub struct UqnoDataProcessor {
    base: Box<dyn DataProcessor>,
    residual_normalizer: Arc<dyn Normalizer>,
    scale_factor: Option<f32>,
}

impl UqnoDataProcessor {
    /// `base` serves the solution model; `residual_normalizer` is the output
    /// normalizer the residual model was trained against.
    pub fn new(base: Box<dyn DataProcessor>, residual_normalizer: Arc<dyn Normalizer>) -> Self {
        Self {
            base,
            residual_normalizer,
            scale_factor: None,
        }
    }

    /// Multiplier applied to every later uncertainty prediction.
    pub fn set_scale_factor(&mut self, factor: f32) -> FieldResult<()> {
        if !factor.is_finite() || factor < 0.0 {
            return Err(FieldError::InvalidArgument(format!(
                "scale factor must be finite and non-negative, got {factor}"
            )));
        }
        debug!(factor, "uncertainty scale factor set");
        self.scale_factor = Some(factor);
        Ok(())
    }

    pub fn clear_scale_factor(&mut self) {
        self.scale_factor = None;
    }

    pub fn scale_factor(&self) -> Option<f32> {
        self.scale_factor
    }

    /// Postprocess without the calibrated scale, used to collect calibration ratios.
    pub(crate) fn postprocess_unscaled(
        &mut self,
        output: (Field, Field),
        sample: Sample,
    ) -> FieldResult<(Field, Sample)> {
        // ground truth is only unnormalised in eval mode
        self.base.eval();
        let (solution, uncertainty) = output;
        let uncertainty = self.residual_normalizer.decode(&uncertainty)?;
        let (solution, mut sample) = self.base.postprocess(solution, sample)?;
        let truth = sample.y()?;
        sample.y = Some(truth.sub(&solution)?);
        sample.x = None;
        Ok((uncertainty, sample))
    }

    pub fn postprocess(
        &mut self,
        output: (Field, Field),
        sample: Sample,
    ) -> FieldResult<(Field, Sample)> {
        let (uncertainty, sample) = self.postprocess_unscaled(output, sample)?;
        match self.scale_factor {
            Some(factor) => Ok((uncertainty.scale(factor), sample)),
            None => Ok((uncertainty, sample)),
        }
    }

    pub fn preprocess(&mut self, sample: Sample) -> FieldResult<Sample> {
        self.base.preprocess(sample)
    }

    /// Preprocess, run both heads of `model`, postprocess.
    pub fn forward(&mut self, model: &Uqno, sample: Sample) -> FieldResult<(Field, Sample)> {
        let sample = self.preprocess(sample)?;
        let output = model.forward(sample.x()?)?;
        self.postprocess(output, sample)
    }

    pub(crate) fn forward_unscaled(
        &mut self,
        model: &Uqno,
        sample: Sample,
    ) -> FieldResult<(Field, Sample)> {
        let sample = self.preprocess(sample)?;
        let output = model.forward(sample.x()?)?;
        self.postprocess_unscaled(output, sample)
    }

    pub fn train(&mut self) {
        self.base.train();
    }

    pub fn eval(&mut self) {
        self.base.eval();
    }

    pub fn is_training(&self) -> bool {
        self.base.is_training()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DefaultDataProcessor, UnitGaussianNormalizer};
    use crate::layers::ChannelLinear;
    use ndarray::array;

    fn gaussian_normalizer(mean: f32, spread: f32) -> Arc<dyn Normalizer> {
        let batch = Field::from_shape_vec(&[2, 1, 1], vec![mean - spread, mean + spread]).unwrap();
        Arc::new(UnitGaussianNormalizer::from_batch(&batch, &[0], 0.0).unwrap())
    }

    fn model() -> Uqno {
        let solution = ChannelLinear::from_weights("sol", array![[1.0]], None).unwrap();
        let residual = ChannelLinear::from_weights("res", array![[0.0]], Some(array![0.5])).unwrap();
        Uqno::new(Box::new(solution), Box::new(residual))
    }

    #[test]
    fn postprocess_returns_decoded_uncertainty_and_residual() {
        // std of {-1, 1} is sqrt(2); residual decode maps 0.5 to 0.5·sqrt(2) + 3
        let residual_normalizer = gaussian_normalizer(3.0, 1.0);
        let mut processor = UqnoDataProcessor::new(Box::new(DefaultDataProcessor::new()), residual_normalizer);
        processor.train();
        let x = Field::from_shape_vec(&[1, 1, 3], vec![1.0, 2.0, 3.0]).unwrap();
        let y = Field::from_shape_vec(&[1, 1, 3], vec![1.5, 2.0, 2.0]).unwrap();
        let (unc, sample) = processor.forward(&model(), Sample::new(x, y)).unwrap();
        assert!(!processor.is_training());
        assert!(sample.x.is_none());
        assert_eq!(sample.y().unwrap().to_vec(), vec![0.5, 0.0, -1.0]);
        let expected = 0.5 * 2.0f32.sqrt() + 3.0;
        for value in unc.to_vec() {
            approx::assert_abs_diff_eq!(value, expected, epsilon = 1e-5);
        }
    }

    #[test]
    fn scale_factor_multiplies_uncertainty() {
        let mut processor =
            UqnoDataProcessor::new(Box::new(DefaultDataProcessor::new()), gaussian_normalizer(0.0, 1.0));
        let sample = || Sample::new(Field::full(&[1, 1, 2], 1.0), Field::full(&[1, 1, 2], 1.0));
        let (plain, _) = processor.forward(&model(), sample()).unwrap();
        processor.set_scale_factor(4.0).unwrap();
        let (scaled, _) = processor.forward(&model(), sample()).unwrap();
        for (a, b) in plain.to_vec().iter().zip(scaled.to_vec()) {
            approx::assert_abs_diff_eq!(a * 4.0, b, epsilon = 1e-5);
        }
        let (unscaled, _) = processor.forward_unscaled(&model(), sample()).unwrap();
        assert_eq!(unscaled, plain);
        assert!(processor.set_scale_factor(f32::NAN).is_err());
        assert!(processor.set_scale_factor(-1.0).is_err());
        assert_eq!(processor.scale_factor(), Some(4.0));
        processor.clear_scale_factor();
        assert_eq!(processor.forward(&model(), sample()).unwrap().0, plain);
    }
}
