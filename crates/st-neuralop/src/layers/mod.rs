// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod activation;
pub mod fno_block;
pub mod linear;
pub mod padding;
pub mod recurrent;
pub mod spectral_conv;

pub use fno_block::FnoBlocks;
pub use linear::ChannelLinear;
pub use padding::{DomainPadding, PaddingDescriptor, PaddingMode};
pub use recurrent::{RnoCell, RnoLayer};
pub use spectral_conv::{Factorization, SpectralConv};
