// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use st_neuralop::telemetry::{init_tracing, InitError};

#[test]
fn foreign_global_subscriber_is_reported_on_every_attempt() {
    tracing::subscriber::set_global_default(tracing_subscriber::registry())
        .expect("fresh test process has no global subscriber");
    for _ in 0..2 {
        assert!(matches!(init_tracing(), Err(InitError::Subscriber(_))));
    }
}
