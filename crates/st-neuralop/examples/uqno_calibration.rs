// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Calibrates an (untrained) UQNO pair on synthetic data and prints the
//! coverage of the resulting bands.
//!
//! ```text
//! cargo run -p st-neuralop --example uqno_calibration -- [config.toml]
//! ```

use std::error::Error;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use st_neuralop::data::DEFAULT_EPS;
use st_neuralop::telemetry::init_tracing;
use st_neuralop::uq::calibration_sweep;
use st_neuralop::{
    collect_calibration_ratios, count_params, DefaultDataProcessor, Field, Fno, GridEmbedding,
    NeuralOpConfig, Sample, UnitGaussianNormalizer, Uqno, UqnoDataProcessor,
};
use tracing::info;

const RES: usize = 32;

fn field(rng: &mut StdRng, amplitude: f32) -> Field {
    Field::from_shape_fn(&[1, 1, RES, RES], |_| amplitude * rng.sample::<f32, _>(StandardNormal))
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing()?;
    let config = match std::env::args().nth(1) {
        Some(path) => NeuralOpConfig::load(path)?,
        None => {
            let mut config = NeuralOpConfig::default();
            config.fno.n_modes = vec![8, 8];
            config.fno.in_channels = 3;
            config.calibration.alphas = vec![0.1, 0.2];
            config
        }
    }
    .with_env_overrides()?;

    let solution = Fno::new("solution", config.fno.clone(), &mut config.rng_for("solution"))?;
    let residual = Fno::new("residual", config.fno.clone(), &mut config.rng_for("residual"))?;
    info!(
        solution = count_params(&solution)?,
        residual = count_params(&residual)?,
        "parameters"
    );
    let model = Uqno::new(Box::new(solution), Box::new(residual));

    let mut rng = config.rng_for("data");
    let inputs: Vec<Field> = (0..64).map(|_| field(&mut rng, 1.0)).collect();
    let targets: Vec<Field> = inputs
        .iter()
        .map(|x| x.map(|v| v.tanh()).add(&field(&mut rng, 0.05)))
        .collect::<Result<_, _>>()?;

    let in_normalizer = UnitGaussianNormalizer::from_batch(&Field::concat(&inputs, 0)?, &[0], DEFAULT_EPS)?;
    let out_normalizer = UnitGaussianNormalizer::from_batch(&Field::concat(&targets, 0)?, &[0], DEFAULT_EPS)?;
    let residual_normalizer = UnitGaussianNormalizer::from_stream(
        targets.iter().map(|y| y.map(f32::abs)),
        DEFAULT_EPS,
    )?;
    let base = DefaultDataProcessor::new()
        .with_in_normalizer(Arc::new(in_normalizer))
        .with_out_normalizer(Arc::new(out_normalizer))
        .with_embedding(GridEmbedding::unit(2)?);
    let mut processor = UqnoDataProcessor::new(Box::new(base), Arc::new(residual_normalizer));

    let mut samples = inputs.into_iter().zip(targets).map(|(x, y)| Sample::new(x, y));
    let calibration: Vec<Sample> = samples.by_ref().take(48).collect();
    let test: Vec<Sample> = samples.collect();

    let ratios = collect_calibration_ratios(&mut processor, &model, calibration)?;
    let records = calibration_sweep(
        &mut processor,
        &model,
        &ratios,
        &test,
        &config.calibration.alphas,
        &config.calibration.deltas,
    )?;
    for record in &records {
        println!(
            "alpha={:.2} delta={:.2} scale={:.4} coverage={:.3} width={:.4}",
            record.alpha,
            record.delta,
            record.scale_factor,
            record.report.coverage_fraction,
            record.report.mean_interval_width
        );
    }
    Ok(())
}
