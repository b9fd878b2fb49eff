use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::classify::backend::Classifier;

/// Stub backend for testing and bench runs without a model.
///
/// Scores are derived from a SHA-256 digest of the frame, so the same frame
/// always classifies the same way. Output length is fixed by `with_classes`
/// (default 2).
pub struct StubClassifier {
    input_len: usize,
    classes: usize,
}

impl StubClassifier {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            input_len: width as usize * height as usize * 3,
            classes: 2,
        }
    }

    /// Override the number of classes scored.
    pub fn with_classes(mut self, classes: usize) -> Self {
        self.classes = classes;
        self
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_len(&self) -> usize {
        self.input_len
    }

    fn classify(&mut self, frame: &[u8]) -> Result<Vec<f32>> {
        let input = frame.get(..self.input_len).ok_or_else(|| {
            anyhow!(
                "expected {} RGB bytes, received {}",
                self.input_len,
                frame.len()
            )
        })?;
        let digest: [u8; 32] = Sha256::digest(input).into();
        Ok((0..self.classes)
            .map(|class| digest[class % digest.len()] as f32 / 255.0)
            .collect())
    }
}
