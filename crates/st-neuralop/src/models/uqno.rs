// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter};
use crate::{Field, FieldResult};

/// Solution operator paired with an operator predicting its pointwise error.
pub struct Uqno {
    solution: Box<dyn Module>,
    residual: Box<dyn Module>,
}

impl Uqno {
    pub fn new(solution: Box<dyn Module>, residual: Box<dyn Module>) -> Self {
        Self { solution, residual }
    }

    pub fn solution(&self) -> &dyn Module {
        self.solution.as_ref()
    }

    pub fn residual(&self) -> &dyn Module {
        self.residual.as_ref()
    }

    /// Returns `(solution_prediction, uncertainty_prediction)` for the same input.
    pub fn forward(&self, input: &Field) -> FieldResult<(Field, Field)> {
        let solution = self.solution.forward(input)?;
        let uncertainty = self.residual.forward(input)?;
        Ok((solution, uncertainty))
    }

    pub fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> FieldResult<()>,
    ) -> FieldResult<()> {
        self.solution.visit_parameters(visitor)?;
        self.residual.visit_parameters(visitor)
    }
}

impl std::fmt::Debug for Uqno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uqno").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::ChannelLinear;
    use ndarray::array;

    #[test]
    fn both_heads_see_the_same_input() {
        let solution = ChannelLinear::from_weights("sol", array![[2.0]], None).unwrap();
        let residual = ChannelLinear::from_weights("res", array![[0.5]], Some(array![1.0])).unwrap();
        let model = Uqno::new(Box::new(solution), Box::new(residual));
        let x = Field::full(&[1, 1, 4], 3.0);
        let (sol, unc) = model.forward(&x).unwrap();
        assert_eq!(sol, Field::full(&[1, 1, 4], 6.0));
        assert_eq!(unc, Field::full(&[1, 1, 4], 2.5));

        let mut names = Vec::new();
        model
            .visit_parameters(&mut |p| {
                names.push(p.name().to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(names, ["sol::weight", "res::weight", "res::bias"]);
    }
}
