// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use st_neuralop::{count_params, Field, FieldError, Module, PaddingMode, Rno, RnoConfig, RnoHiddenStates};

fn model(padding: Option<Vec<f32>>, mode: PaddingMode, residual: bool) -> Rno {
    let mut rng = StdRng::seed_from_u64(2024);
    Rno::new(
        "rno",
        RnoConfig {
            n_modes: vec![4, 3],
            in_channels: 2,
            out_channels: 2,
            hidden_channels: 4,
            n_layers: 3,
            residual,
            domain_padding: padding,
            domain_padding_mode: mode,
            ..RnoConfig::default()
        },
        &mut rng,
    )
    .unwrap()
}

fn initial_sequence() -> Field {
    let mut rng = StdRng::seed_from_u64(7);
    Field::from_shape_fn(&[2, 3, 8, 6, 2], |_| rng.sample::<f32, _>(StandardNormal) * 0.5)
}

fn manual_rollout(rno: &Rno, x0: &Field, steps: usize) -> Field {
    let mut hidden = RnoHiddenStates::new(rno.n_layers());
    let mut input = x0.clone();
    let mut outputs = Vec::new();
    for _ in 0..steps {
        let pred = rno.forward(&input, &mut hidden).unwrap();
        input = pred.insert_axis(1).unwrap();
        outputs.push(pred);
    }
    Field::stack(&outputs, 1).unwrap()
}

#[test]
fn predict_matches_step_by_step_forward() {
    let configurations = [
        (None, PaddingMode::OneSided, false),
        (Some(vec![0.25]), PaddingMode::OneSided, true),
        (Some(vec![0.25, 0.5]), PaddingMode::Symmetric, false),
    ];
    for (padding, mode, residual) in configurations {
        let rno = model(padding, mode, residual);
        let x0 = initial_sequence();
        for steps in [1, 5] {
            let predicted = rno.predict(&x0, steps).unwrap();
            assert_eq!(predicted.shape(), &[2, steps, 8, 6, 2]);
            assert!(predicted.is_finite());
            assert_eq!(predicted, manual_rollout(&rno, &x0, steps));
        }
    }
}

#[test]
fn rollout_depends_on_carried_memory() {
    let rno = model(None, PaddingMode::OneSided, false);
    let x0 = initial_sequence();
    let rollout = rno.predict(&x0, 2).unwrap();

    // second step from the first prediction but with empty memory
    let first = rollout.index_axis(1, 0).unwrap();
    let mut fresh = RnoHiddenStates::new(rno.n_layers());
    let memoryless = rno.forward(&first.insert_axis(1).unwrap(), &mut fresh).unwrap();
    assert_ne!(memoryless, rollout.index_axis(1, 1).unwrap());
}

#[test]
fn hidden_state_contract_is_enforced() {
    let rno = model(None, PaddingMode::OneSided, false);
    assert!(matches!(
        RnoHiddenStates::from_states(vec![None, None], rno.n_layers()),
        Err(FieldError::InvalidConfiguration(_))
    ));
    let mut states = RnoHiddenStates::from_states(vec![None; 3], rno.n_layers()).unwrap();
    rno.forward(&initial_sequence(), &mut states).unwrap();
    assert!(states.is_primed());

    let wrong_rank = Field::zeros(&[2, 3, 8, 2]);
    assert!(matches!(
        rno.forward(&wrong_rank, &mut states),
        Err(FieldError::InvalidArgument(_))
    ));
    assert!(count_params(&rno).unwrap() > 0);
    assert_eq!(Module::forward(&rno, &initial_sequence()).unwrap().shape(), &[2, 8, 6, 2]);
}
