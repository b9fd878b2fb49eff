#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;
use tract_onnx::tract_hir::infer::Factoid;

use crate::classify::backend::Classifier;

/// Memory layout of the model's image input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InputLayout {
    /// `[1, H, W, 3]`, byte order identical to an RGB24 frame.
    Nhwc,
    /// `[1, 3, H, W]`, planar channels.
    Nchw,
}

/// Tract-based backend for ONNX classification models.
///
/// The model's declared input is checked against the frame size when the
/// backend is built. `u8` inputs receive the frame bytes unchanged; `f32`
/// inputs receive them scaled to `0..=1`.
pub struct TractClassifier {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
    layout: InputLayout,
    datum: DatumType,
}

impl TractClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?;

        let declared = model
            .input_fact(0)
            .context("model declares no input 0")?
            .clone();
        let layout = match declared.shape.concretize() {
            Some(dims) => {
                let dims: Vec<Option<usize>> =
                    dims.iter().map(|dim| dim.to_usize().ok()).collect();
                layout_for(&dims, width, height)?
            }
            None => {
                log::warn!(
                    "TractClassifier: {} has no concrete input shape, assuming NHWC",
                    model_path.display()
                );
                InputLayout::Nhwc
            }
        };
        let datum = match declared.datum_type.concretize() {
            Some(dt) if dt == u8::datum_type() || dt == f32::datum_type() => dt,
            Some(dt) => {
                return Err(anyhow!(
                    "model input type {:?} is not supported (expected u8 or f32)",
                    dt
                ))
            }
            None => f32::datum_type(),
        };

        let shape = input_shape(layout, width, height);
        let model = model
            .with_input_fact(0, InferenceFact::dt_shape(datum, shape))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractClassifier: loaded {} ({:?} {:?}, {}x{})",
            model_path.display(),
            layout,
            datum,
            width,
            height
        );
        Ok(Self {
            model,
            width,
            height,
            layout,
            datum,
        })
    }

    fn build_input(&self, frame: &[u8]) -> Result<Tensor> {
        let expected_len = self.input_len();
        let pixels = frame.get(..expected_len).ok_or_else(|| {
            anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                frame.len()
            )
        })?;
        let shape = input_shape(self.layout, self.width, self.height);

        if self.datum == u8::datum_type() {
            return match self.layout {
                InputLayout::Nhwc => Tensor::from_shape::<u8>(&shape, pixels)
                    .context("failed to build u8 input tensor"),
                InputLayout::Nchw => {
                    let width = self.width as usize;
                    let input = tract_ndarray::Array4::from_shape_fn(
                        (1, 3, self.height as usize, width),
                        |(_, channel, y, x)| pixels[(y * width + x) * 3 + channel],
                    );
                    Ok(input.into_tensor())
                }
            };
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let input = match self.layout {
            InputLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, height, width, 3), |(_, y, x, c)| {
                    pixels[(y * width + x) * 3 + c] as f32 / 255.0
                })
            }
            InputLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| {
                    pixels[(y * width + x) * 3 + c] as f32 / 255.0
                })
            }
        };
        Ok(input.into_tensor())
    }
}

impl Classifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    fn classify(&mut self, frame: &[u8]) -> Result<Vec<f32>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(scores.iter().copied().collect())
    }
}

fn input_shape(layout: InputLayout, width: u32, height: u32) -> [usize; 4] {
    let (w, h) = (width as usize, height as usize);
    match layout {
        InputLayout::Nhwc => [1, h, w, 3],
        InputLayout::Nchw => [1, 3, h, w],
    }
}

/// Match a declared input shape against the frame size. Symbolic dimensions
/// (`None`) match anything.
fn layout_for(dims: &[Option<usize>], width: u32, height: u32) -> Result<InputLayout> {
    let fits = |expected: [usize; 4]| {
        dims.len() == 4
            && dims
                .iter()
                .zip(expected)
                .all(|(dim, want)| dim.map_or(true, |d| d == want))
    };
    if fits(input_shape(InputLayout::Nhwc, width, height)) {
        Ok(InputLayout::Nhwc)
    } else if fits(input_shape(InputLayout::Nchw, width, height)) {
        Ok(InputLayout::Nchw)
    } else {
        Err(anyhow!(
            "model input shape {:?} does not match {}x{} RGB frames",
            dims,
            width,
            height
        ))
    }
}
