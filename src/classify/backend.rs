use anyhow::Result;

/// Inference engine seam used by the control loop.
///
/// Implementations own their model and input/output tensors. The score vector
/// returned by `classify` is produced fresh for every call; callers read it and
/// drop it before the next frame.
pub trait Classifier {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Size in bytes of the RGB24 frame the model expects.
    fn input_len(&self) -> usize;

    /// Fill the input tensor from `frame`, invoke the model and return output
    /// tensor 0 as one score per class.
    fn classify(&mut self, frame: &[u8]) -> Result<Vec<f32>>;
}
