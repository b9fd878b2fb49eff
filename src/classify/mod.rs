mod backend;
mod backends;
mod scores;

pub use backend::Classifier;
pub use backends::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;
pub use scores::{argmax, TopClass};

use anyhow::Result;
use std::path::Path;

/// Open the classifier named by `model_path` for `width` x `height` RGB24
/// frames. `stub://` paths select the stub backend, scoring `classes` classes.
pub fn open(
    model_path: &Path,
    width: u32,
    height: u32,
    classes: usize,
) -> Result<Box<dyn Classifier>> {
    if model_path.to_string_lossy().starts_with("stub://") {
        return Ok(Box::new(
            StubClassifier::new(width, height).with_classes(classes),
        ));
    }
    open_model(model_path, width, height)
}

#[cfg(feature = "backend-tract")]
fn open_model(model_path: &Path, width: u32, height: u32) -> Result<Box<dyn Classifier>> {
    Ok(Box::new(TractClassifier::new(model_path, width, height)?))
}

#[cfg(not(feature = "backend-tract"))]
fn open_model(model_path: &Path, _width: u32, _height: u32) -> Result<Box<dyn Classifier>> {
    if !model_path.exists() {
        return Err(anyhow::anyhow!(
            "model file {} not found",
            model_path.display()
        ));
    }
    Err(anyhow::anyhow!(
        "model {} requires the backend-tract feature (or a stub:// path)",
        model_path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_path_opens_the_stub_backend() -> Result<()> {
        let classifier = open(Path::new("stub://classifier"), 4, 4, 2)?;
        assert_eq!(classifier.name(), "stub");
        assert_eq!(classifier.input_len(), 4 * 4 * 3);
        Ok(())
    }

    #[test]
    fn missing_model_fails_to_open() {
        assert!(open(Path::new("/nonexistent/model.onnx"), 4, 4, 2).is_err());
    }
}
