//! Capture, classify, decide, render.
//!
//! `Verifier` bundles every device handle the loop needs. It is built once at
//! startup; any failure while opening a device aborts construction and drops
//! whatever was already opened. Dropping the verifier releases everything:
//! the indicator is driven off, the capture stream stops and the framebuffer
//! is unmapped.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::capture::{Acquired, CaptureStats, VideoSource};
use crate::classify::{self, argmax, Classifier};
use crate::config::VerifierConfig;
use crate::display::Display;
use crate::frame::FrameBuffer;
use crate::indicator::Indicator;
use crate::labels::LabelTable;
use crate::progress::Ui;
use crate::screen::Screen;

/// Outcome of classifying one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub label: String,
    pub score: f32,
    /// Winning label equals the target label.
    pub matched: bool,
}

impl Verdict {
    /// Text for the on-screen status label.
    pub fn status_line(&self) -> String {
        if self.matched {
            format!("{} package detected.", self.label)
        } else {
            format!("{} package NOT detected!", self.label)
        }
    }

    /// Per-frame console line.
    pub fn console_line(&self) -> String {
        format!("Detected: {} ({:.2})", self.label, self.score)
    }
}

/// What one loop iteration did.
#[derive(Clone, Debug, PartialEq)]
pub enum Iteration {
    Classified(Verdict),
    /// Capture timed out or was interrupted; nothing was classified.
    Skipped,
}

/// Counters for a finished run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub classified: u64,
    pub skipped: u64,
    pub matches: u64,
}

/// Pick the winning label for `scores` and compare it with `target`.
///
/// The score vector must hold exactly one score per label.
pub fn decide(labels: &LabelTable, scores: &[f32], target: &str) -> Result<Verdict> {
    if scores.len() != labels.len() {
        return Err(anyhow!(
            "model produced {} scores for {} labels",
            scores.len(),
            labels.len()
        ));
    }
    let top = argmax(scores).ok_or_else(|| anyhow!("model produced an empty score vector"))?;
    let label = labels
        .get(top.index)
        .ok_or_else(|| anyhow!("no label for class {}", top.index))?;
    Ok(Verdict {
        label: label.to_string(),
        score: top.score,
        matched: label == target,
    })
}

pub struct Verifier {
    target: String,
    labels: LabelTable,
    classifier: Box<dyn Classifier>,
    indicator: Indicator,
    display: Display,
    screen: Screen,
    source: VideoSource,
    frame: FrameBuffer,
    frame_period: Duration,
    iterations: u64,
}

impl Verifier {
    /// Load labels and model, then open every device, reporting each stage.
    pub fn open(config: &VerifierConfig, target: &str, ui: &Ui) -> Result<Self> {
        let labels = ui.run_stage("Load labels", || {
            let labels = LabelTable::load(&config.labels_path)?;
            if labels.is_empty() {
                return Err(anyhow!(
                    "label file {} holds no labels",
                    config.labels_path.display()
                ));
            }
            Ok(labels)
        })?;
        if !labels.contains(target) {
            log::warn!(
                "target label {:?} is not in {}; it can never be detected",
                target,
                config.labels_path.display()
            );
        }

        let classifier = ui.run_stage("Load model", || {
            let classifier = classify::open(
                &config.model_path,
                config.camera.width,
                config.camera.height,
                labels.len(),
            )?;
            check_input_len(classifier.as_ref(), config)?;
            Ok(classifier)
        })?;

        let indicator = ui.run_stage("Open indicator", || Indicator::open(&config.indicator))?;
        let display = ui.run_stage("Open display", || Display::open(&config.display))?;
        let screen = Screen::new(&config.display);
        let source = ui.run_stage("Open camera", || VideoSource::open(&config.camera))?;

        log::info!(
            "verifier ready: {} labels, target {:?}, {} backend",
            labels.len(),
            target,
            classifier.name()
        );
        Ok(Self {
            target: target.to_string(),
            labels,
            classifier,
            indicator,
            display,
            screen,
            source,
            frame: FrameBuffer::new(config.camera.width, config.camera.height),
            frame_period: config.frame_period,
            iterations: 0,
        })
    }

    /// Swap in a different inference backend. Its input size must match the
    /// frame buffer.
    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Result<Self> {
        if classifier.input_len() != self.frame.len() {
            return Err(anyhow!(
                "classifier expects {} input bytes, frames hold {}",
                classifier.input_len(),
                self.frame.len()
            ));
        }
        self.classifier = classifier;
        Ok(self)
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn indicator(&self) -> &Indicator {
        &self.indicator
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    /// The frame buffer the preview widget renders from.
    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn capture_stats(&self) -> CaptureStats {
        self.source.stats()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Run one iteration without the trailing sleep.
    pub fn step(&mut self) -> Result<Iteration> {
        let outcome = match self.source.acquire()? {
            Acquired::TimedOut => {
                log::warn!(
                    "no frame within the capture timeout; skipping iteration {}",
                    self.iterations
                );
                Iteration::Skipped
            }
            Acquired::Interrupted => {
                log::debug!("capture wait interrupted; skipping iteration {}", self.iterations);
                Iteration::Skipped
            }
            Acquired::Frame(bytes) => {
                self.frame.copy_from(bytes)?;
                let scores = self.classifier.classify(self.frame.as_bytes())?;
                let verdict = decide(&self.labels, &scores, &self.target)?;
                println!("{}", verdict.console_line());
                log::debug!("frame {}: scores {:?}", self.frame.generation(), scores);

                self.indicator.set(verdict.matched);
                self.screen.set_text(&verdict.status_line());
                self.screen.set_source(self.frame.descriptor());
                Iteration::Classified(verdict)
            }
        };
        self.screen.process(&self.frame, &mut self.display)?;
        self.iterations += 1;
        Ok(outcome)
    }

    /// Loop until `shutdown` is raised or `limit` iterations have run,
    /// sleeping the configured frame period after every iteration.
    pub fn run(&mut self, shutdown: &AtomicBool, limit: Option<u64>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        while !shutdown.load(Ordering::SeqCst) {
            if limit.is_some_and(|limit| summary.iterations >= limit) {
                break;
            }
            match self.step()? {
                Iteration::Classified(verdict) => {
                    summary.classified += 1;
                    if verdict.matched {
                        summary.matches += 1;
                    }
                }
                Iteration::Skipped => summary.skipped += 1,
            }
            summary.iterations += 1;
            std::thread::sleep(self.frame_period);
        }
        log::info!(
            "loop stopped after {} iterations ({} classified, {} skipped, {} matches)",
            summary.iterations,
            summary.classified,
            summary.skipped,
            summary.matches
        );
        Ok(summary)
    }
}

fn check_input_len(classifier: &dyn Classifier, config: &VerifierConfig) -> Result<()> {
    if classifier.input_len() != config.frame_len() {
        return Err(anyhow!(
            "model {} expects {} input bytes, {}x{} RGB frames hold {}",
            config.model_path.display(),
            classifier.input_len(),
            config.camera.width,
            config.camera.height,
            config.frame_len()
        ));
    }
    Ok(())
}
