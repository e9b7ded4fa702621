// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::embedding::GridEmbedding;
use super::normalizer::Normalizer;
use crate::{Field, FieldError, FieldResult};

/// One batch travelling through a data processor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sample {
    pub x: Option<Field>,
    pub y: Option<Field>,
    /// Auxiliary named fields carried alongside the pair.
    pub extras: BTreeMap<String, Field>,
    y_encoded: bool,
}

impl Sample {
    pub fn new(x: Field, y: Field) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            extras: BTreeMap::new(),
            y_encoded: false,
        }
    }

    pub fn with_extra(mut self, name: impl Into<String>, field: Field) -> Self {
        self.extras.insert(name.into(), field);
        self
    }

    pub fn x(&self) -> FieldResult<&Field> {
        self.x
            .as_ref()
            .ok_or_else(|| FieldError::InvalidArgument("sample has no input field `x`".into()))
    }

    pub fn y(&self) -> FieldResult<&Field> {
        self.y
            .as_ref()
            .ok_or_else(|| FieldError::InvalidArgument("sample has no target field `y`".into()))
    }

    /// Whether `y` currently holds normalised values.
    pub fn y_is_encoded(&self) -> bool {
        self.y_encoded
    }
}

/// Transforms applied to a sample before the model and to its output after.
pub trait DataProcessor: fmt::Debug {
    fn preprocess(&mut self, sample: Sample) -> FieldResult<Sample>;

    fn postprocess(&mut self, output: Field, sample: Sample) -> FieldResult<(Field, Sample)>;

    fn train(&mut self);

    fn eval(&mut self);

    fn is_training(&self) -> bool;
}

/// Input normalisation, optional positional embedding and output normalisation.
///
/// Targets are normalised only while training, where losses are taken in
/// normalised space. In eval mode outputs are decoded, and so are targets
/// that were encoded on the way in.
#[derive(Debug, Default)]
pub struct DefaultDataProcessor {
    in_normalizer: Option<Arc<dyn Normalizer>>,
    out_normalizer: Option<Arc<dyn Normalizer>>,
    embedding: Option<GridEmbedding>,
    training: bool,
}

impl DefaultDataProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_in_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.in_normalizer = Some(normalizer);
        self
    }

    pub fn with_out_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.out_normalizer = Some(normalizer);
        self
    }

    pub fn with_embedding(mut self, embedding: GridEmbedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn in_normalizer(&self) -> Option<&Arc<dyn Normalizer>> {
        self.in_normalizer.as_ref()
    }

    pub fn out_normalizer(&self) -> Option<&Arc<dyn Normalizer>> {
        self.out_normalizer.as_ref()
    }
}

impl DataProcessor for DefaultDataProcessor {
    fn preprocess(&mut self, mut sample: Sample) -> FieldResult<Sample> {
        let mut x = sample.x()?.clone();
        if let Some(normalizer) = &self.in_normalizer {
            x = normalizer.encode(&x)?;
        }
        if let Some(embedding) = &self.embedding {
            x = embedding.embed(&x)?;
        }
        sample.x = Some(x);
        if let (Some(normalizer), true, false) =
            (&self.out_normalizer, self.training, sample.y_encoded)
        {
            if let Some(y) = sample.y.take() {
                sample.y = Some(normalizer.encode(&y)?);
                sample.y_encoded = true;
            }
        }
        Ok(sample)
    }

    fn postprocess(&mut self, output: Field, mut sample: Sample) -> FieldResult<(Field, Sample)> {
        match &self.out_normalizer {
            Some(normalizer) if !self.training => {
                let output = normalizer.decode(&output)?;
                if sample.y_encoded {
                    if let Some(y) = sample.y.take() {
                        sample.y = Some(normalizer.decode(&y)?);
                    }
                    sample.y_encoded = false;
                }
                Ok((output, sample))
            }
            _ => Ok((output, sample)),
        }
    }

    fn train(&mut self) {
        self.training = true;
    }

    fn eval(&mut self) {
        self.training = false;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
