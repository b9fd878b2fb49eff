//! Control loop tests against the stub:// backends.
//!
//! Covers the decision path end to end (indicator, status text, console
//! verdict), frame copy fidelity from capture through to the framebuffer,
//! startup failures, capture timeouts and loop cadence.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tempfile::NamedTempFile;

use smart_verifier::capture::SyntheticSource;
use smart_verifier::progress::Ui;
use smart_verifier::screen::{rgb565, WAITING_TEXT};
use smart_verifier::{Acquired, Classifier, Iteration, Verifier, VerifierConfig};

/// Returns queued score vectors in order and records every input frame.
struct Scripted {
    input_len: usize,
    scores: VecDeque<Vec<f32>>,
    seen: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl Classifier for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn input_len(&self) -> usize {
        self.input_len
    }

    fn classify(&mut self, frame: &[u8]) -> Result<Vec<f32>> {
        self.seen.borrow_mut().push(frame.to_vec());
        self.scores
            .pop_front()
            .ok_or_else(|| anyhow!("score script exhausted"))
    }
}

fn label_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp label file");
    file.write_all(contents.as_bytes()).expect("write labels");
    file
}

fn stub_config(labels: &NamedTempFile) -> VerifierConfig {
    let mut cfg = VerifierConfig::stub();
    cfg.labels_path = labels.path().to_path_buf();
    cfg.camera.width = 16;
    cfg.camera.height = 8;
    cfg.camera.timeout = Duration::from_millis(50);
    cfg.display.width = 128;
    cfg.display.height = 96;
    cfg.display.draw_buffer_lines = 8;
    cfg.frame_period = Duration::from_millis(1);
    cfg
}

fn scripted(
    cfg: &VerifierConfig,
    scores: Vec<Vec<f32>>,
) -> (Box<dyn Classifier>, Rc<RefCell<Vec<Vec<u8>>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let classifier = Scripted {
        input_len: cfg.frame_len(),
        scores: scores.into(),
        seen: seen.clone(),
    };
    (Box::new(classifier), seen)
}

#[test]
fn target_label_lights_the_indicator() -> Result<()> {
    let labels = label_file("box_small\nbox_large\n");
    let cfg = stub_config(&labels);
    let (classifier, _) = scripted(&cfg, vec![vec![0.1, 0.9], vec![0.8, 0.2]]);
    let mut verifier =
        Verifier::open(&cfg, "box_large", &Ui::plain())?.with_classifier(classifier)?;
    assert_eq!(verifier.screen().status_text(), WAITING_TEXT);
    assert!(!verifier.indicator().is_on());

    let Iteration::Classified(first) = verifier.step()? else {
        panic!("stub camera never stalls");
    };
    assert!(first.matched);
    assert_eq!(first.console_line(), "Detected: box_large (0.90)");
    assert!(verifier.indicator().is_on());
    assert_eq!(verifier.screen().status_text(), "box_large package detected.");

    let Iteration::Classified(second) = verifier.step()? else {
        panic!("stub camera never stalls");
    };
    assert!(!second.matched);
    assert!(!verifier.indicator().is_on());
    assert_eq!(
        verifier.screen().status_text(),
        "box_small package NOT detected!"
    );
    Ok(())
}

#[test]
fn equal_scores_pick_the_first_label() -> Result<()> {
    let labels = label_file("a\nb\nc\nd\n");
    let cfg = stub_config(&labels);
    let (classifier, _) = scripted(&cfg, vec![vec![0.2, 0.9, 0.9, 0.1]]);
    let mut verifier = Verifier::open(&cfg, "c", &Ui::plain())?.with_classifier(classifier)?;

    match verifier.step()? {
        Iteration::Classified(verdict) => {
            assert_eq!(verdict.label, "b");
            assert!(!verdict.matched);
        }
        Iteration::Skipped => panic!("stub camera never stalls"),
    }
    Ok(())
}

#[test]
fn preview_shows_the_frame_just_captured() -> Result<()> {
    let labels = label_file("box_small\nbox_large\n");
    let cfg = stub_config(&labels);
    let (classifier, seen) = scripted(&cfg, vec![vec![0.5, 0.1]; 3]);
    let mut verifier =
        Verifier::open(&cfg, "box_small", &Ui::plain())?.with_classifier(classifier)?;
    let mut reference = SyntheticSource::new(&cfg.camera)?;

    for _ in 0..3 {
        verifier.step()?;
        let expected = match reference.acquire()? {
            Acquired::Frame(bytes) => bytes.to_vec(),
            other => panic!("reference source returned {other:?}"),
        };

        let frame = verifier.frame();
        assert_eq!(frame.as_bytes(), expected.as_slice());
        assert_eq!(seen.borrow().last().map(Vec::as_slice), Some(expected.as_slice()));

        let area = verifier
            .screen()
            .preview_area()
            .expect("preview has a source after a classified frame");
        for (x, y) in [(0, 0), (15, 0), (7, 3), (15, 7)] {
            let pixel = frame.pixel(x, y).expect("pixel inside frame");
            assert_eq!(
                verifier.display().pixel(area.x1 + x, area.y1 + y),
                Some(u16::from_le_bytes(rgb565(pixel)))
            );
        }
    }
    Ok(())
}

#[test]
fn first_iteration_paints_the_whole_screen() -> Result<()> {
    let labels = label_file("box_small\nbox_large\n");
    let cfg = stub_config(&labels);
    let mut verifier = Verifier::open(&cfg, "box_small", &Ui::plain())?;
    assert_eq!(verifier.display().flushed_areas(), 0);

    verifier.step()?;
    // 96 rows in bands of 8.
    assert_eq!(verifier.display().flushed_areas(), 12);
    assert!(!verifier.screen().has_pending());
    Ok(())
}

#[test]
fn capture_timeouts_skip_the_iteration() -> Result<()> {
    let labels = label_file("box_small\nbox_large\n");
    let mut cfg = stub_config(&labels);
    cfg.camera.device = "stub://camera?stall_every=2".to_string();
    let mut verifier = Verifier::open(&cfg, "box_small", &Ui::plain())?;

    let summary = verifier.run(&AtomicBool::new(false), Some(4))?;
    assert_eq!(summary.iterations, 4);
    assert_eq!(summary.classified, 2);
    assert_eq!(summary.skipped, 2);

    let stats = verifier.capture_stats();
    assert_eq!(stats.frames_captured, 2);
    assert_eq!(stats.timeouts, 2);
    // The buffer stranded by the first timeout was recovered before the
    // third acquire; the second timeout is still pending.
    assert_eq!(stats.restarts, 1);
    Ok(())
}

#[test]
fn interrupted_waits_skip_the_iteration_and_keep_looping() -> Result<()> {
    let labels = label_file("box_small\nbox_large\n");
    let mut cfg = stub_config(&labels);
    cfg.camera.device = "stub://camera?stall_every=3&interrupt_every=2".to_string();
    let mut verifier = Verifier::open(&cfg, "box_small", &Ui::plain())?;

    // Attempts 2, 3 and 4 all return without a frame.
    let outcomes: Vec<bool> = (0..5)
        .map(|_| verifier.step().map(|it| matches!(it, Iteration::Classified(_))))
        .collect::<Result<_>>()?;
    assert_eq!(outcomes, [true, false, false, false, true]);

    let stats = verifier.capture_stats();
    assert_eq!(stats.frames_captured, 2);
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.restarts, 3);
    Ok(())
}

#[test]
fn iterations_never_run_faster_than_the_frame_period() -> Result<()> {
    let labels = label_file("box_small\nbox_large\n");
    let mut cfg = stub_config(&labels);
    cfg.frame_period = Duration::from_millis(20);
    let mut verifier = Verifier::open(&cfg, "box_small", &Ui::plain())?;

    let started = Instant::now();
    let summary = verifier.run(&AtomicBool::new(false), Some(3))?;
    assert_eq!(summary.iterations, 3);
    assert!(started.elapsed() >= Duration::from_millis(60));
    Ok(())
}

#[test]
fn raised_shutdown_flag_stops_before_the_first_iteration() -> Result<()> {
    let labels = label_file("box_small\nbox_large\n");
    let cfg = stub_config(&labels);
    let mut verifier = Verifier::open(&cfg, "box_small", &Ui::plain())?;

    let summary = verifier.run(&AtomicBool::new(true), None)?;
    assert_eq!(summary.iterations, 0);
    assert_eq!(verifier.display().flushed_areas(), 0);
    Ok(())
}

#[test]
fn score_vector_must_cover_every_label() -> Result<()> {
    let labels = label_file("box_small\nbox_large\n");
    let cfg = stub_config(&labels);
    let (classifier, _) = scripted(&cfg, vec![vec![0.1, 0.2, 0.7]]);
    let mut verifier =
        Verifier::open(&cfg, "box_small", &Ui::plain())?.with_classifier(classifier)?;
    assert!(verifier.step().is_err());
    Ok(())
}

#[test]
fn classifier_with_the_wrong_input_size_is_rejected() -> Result<()> {
    let labels = label_file("box_small\nbox_large\n");
    let cfg = stub_config(&labels);
    let classifier = Box::new(Scripted {
        input_len: cfg.frame_len() + 1,
        scores: VecDeque::new(),
        seen: Rc::new(RefCell::new(Vec::new())),
    });
    let verifier = Verifier::open(&cfg, "box_small", &Ui::plain())?;
    assert!(verifier.with_classifier(classifier).is_err());
    Ok(())
}

#[test]
fn missing_label_file_fails_startup() {
    let labels = label_file("box_small\n");
    let mut cfg = stub_config(&labels);
    cfg.labels_path = labels.path().with_extension("missing");
    let ui = Ui::recorded();
    assert!(Verifier::open(&cfg, "box_small", &ui).is_err());

    let lines = ui.transcript();
    assert_eq!(lines.len(), 2, "{lines:?}");
    assert_eq!(lines[0], "==> Load labels");
    assert!(lines[1].starts_with("✘ Load labels failed"), "{lines:?}");
}

#[test]
fn successful_startup_reports_every_stage() -> Result<()> {
    let labels = label_file("box_small\n");
    let cfg = stub_config(&labels);
    let ui = Ui::recorded();
    Verifier::open(&cfg, "box_small", &ui)?;

    let done: Vec<String> = ui
        .transcript()
        .into_iter()
        .filter(|line| line.starts_with('✔'))
        .collect();
    assert_eq!(done.len(), 5, "{done:?}");
    assert!(done[4].starts_with("✔ Open camera"));
    Ok(())
}

#[test]
fn empty_label_file_fails_startup() {
    let labels = label_file("");
    let cfg = stub_config(&labels);
    assert!(Verifier::open(&cfg, "box_small", &Ui::plain()).is_err());
}

#[test]
fn missing_model_fails_startup() {
    let labels = label_file("box_small\n");
    let mut cfg = stub_config(&labels);
    cfg.model_path = labels.path().with_extension("onnx");
    assert!(Verifier::open(&cfg, "box_small", &Ui::plain()).is_err());
}

#[test]
fn unopenable_devices_fail_startup() {
    let labels = label_file("box_small\n");

    let mut cfg = stub_config(&labels);
    cfg.camera.device = "/nonexistent/video9".to_string();
    assert!(Verifier::open(&cfg, "box_small", &Ui::plain()).is_err());

    let mut cfg = stub_config(&labels);
    cfg.display.device = "/nonexistent/fb9".to_string();
    assert!(Verifier::open(&cfg, "box_small", &Ui::plain()).is_err());

    let mut cfg = stub_config(&labels);
    cfg.indicator.chip = "/nonexistent/gpiochip9".to_string();
    assert!(Verifier::open(&cfg, "box_small", &Ui::plain()).is_err());
}
