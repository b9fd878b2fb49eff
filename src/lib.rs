//! Smart Verifier
//!
//! Package verification appliance: a camera watches a conveyor position, a
//! classifier names the package in view, and an indicator light plus an
//! on-screen status line report whether it is the package the operator asked
//! for.
//!
//! # Architecture
//!
//! Single process, single thread. Every iteration of the control loop:
//!
//! 1. Acquires one frame from the camera (bounded wait).
//! 2. Copies it into the shared frame buffer.
//! 3. Classifies the frame buffer.
//! 4. Picks the highest-scoring label (first index wins ties).
//! 5. Compares it with the target label, drives the indicator and updates the
//!    status label and preview widgets.
//! 6. Renders invalidated screen areas to the framebuffer.
//! 7. Sleeps a fixed frame period.
//!
//! # Module Structure
//!
//! - `labels`: fixed-capacity label table loaded at startup
//! - `capture`: single-buffer video source (V4L2 or synthetic)
//! - `classify`: inference backends (tract or stub) and score selection
//! - `frame`: the shared RGB24 frame buffer
//! - `screen`: status label and preview widgets, banded rendering
//! - `display`: framebuffer mapping and RGB565 blits
//! - `indicator`: GPIO output line
//! - `verifier`: device context and the control loop
//! - `config`: JSON config file plus environment overrides
//! - `progress`: startup stage reporting

pub mod capture;
pub mod classify;
pub mod config;
pub mod display;
pub mod frame;
pub mod indicator;
pub mod labels;
pub mod progress;
pub mod screen;
pub mod verifier;

pub use capture::{Acquired, CaptureStats, VideoSource};
pub use classify::{argmax, Classifier, StubClassifier, TopClass};
pub use config::VerifierConfig;
pub use display::Display;
pub use frame::{FrameBuffer, ImageDescriptor};
pub use indicator::Indicator;
pub use labels::{LabelTable, MAX_LABELS, MAX_LABEL_LEN};
pub use screen::{Area, FlushTarget, Screen};
pub use verifier::{decide, Iteration, RunSummary, Verdict, Verifier};
