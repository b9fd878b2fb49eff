use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use smart_verifier::config::VerifierConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SMART_VERIFIER_CONFIG",
        "SMART_VERIFIER_LABELS",
        "SMART_VERIFIER_MODEL",
        "SMART_VERIFIER_CAMERA",
        "SMART_VERIFIER_FRAMEBUFFER",
        "SMART_VERIFIER_GPIO_CHIP",
        "SMART_VERIFIER_GPIO_LINE",
        "SMART_VERIFIER_FRAME_PERIOD_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        r#"{
            "labels_path": "/opt/verifier/labels.txt",
            "model_path": "/opt/verifier/boxes.onnx",
            "camera": { "device": "/dev/video2", "width": 224, "height": 224, "timeout_ms": 500 },
            "display": { "device": "/dev/fb1", "width": 480, "height": 320, "draw_buffer_lines": 20 },
            "indicator": { "chip": "/dev/gpiochip0", "line": 17 },
            "frame_period_ms": 100
        }"#,
    );

    std::env::set_var("SMART_VERIFIER_CAMERA", "stub://camera");
    std::env::set_var("SMART_VERIFIER_GPIO_LINE", "22");

    let cfg = VerifierConfig::load(Some(file.path())).expect("load config");
    assert_eq!(cfg.labels_path.to_str(), Some("/opt/verifier/labels.txt"));
    assert_eq!(cfg.model_path.to_str(), Some("/opt/verifier/boxes.onnx"));
    assert_eq!(cfg.camera.device, "stub://camera");
    assert_eq!((cfg.camera.width, cfg.camera.height), (224, 224));
    assert_eq!(cfg.camera.timeout, Duration::from_millis(500));
    assert_eq!(cfg.display.device, "/dev/fb1");
    assert_eq!((cfg.display.width, cfg.display.height), (480, 320));
    assert_eq!(cfg.display.draw_buffer_lines, 20);
    assert_eq!(cfg.indicator.chip, "/dev/gpiochip0");
    assert_eq!(cfg.indicator.line, 22);
    assert_eq!(cfg.frame_period, Duration::from_millis(100));
    assert_eq!(cfg.frame_len(), 224 * 224 * 3);

    clear_env();
}

#[test]
fn defaults_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = VerifierConfig::load(None).expect("load defaults");
    assert_eq!(cfg.labels_path.to_str(), Some("../models/labels.txt"));
    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!(cfg.display.device, "/dev/fb0");
    assert_eq!(cfg.indicator.chip, "/dev/gpiochip4");
    assert_eq!(cfg.indicator.line, 3);
    assert_eq!(cfg.frame_period, Duration::from_millis(33));
}

#[test]
fn blank_env_values_are_ignored() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SMART_VERIFIER_FRAMEBUFFER", "   ");
    let cfg = VerifierConfig::load(None).expect("load config");
    assert_eq!(cfg.display.device, "/dev/fb0");

    clear_env();
}

#[test]
fn malformed_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SMART_VERIFIER_GPIO_LINE", "three");
    assert!(VerifierConfig::load(None).is_err());
    clear_env();

    std::env::set_var("SMART_VERIFIER_FRAME_PERIOD_MS", "-5");
    assert!(VerifierConfig::load(None).is_err());
    clear_env();
}

#[test]
fn invalid_geometry_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let oversized = config_file(r#"{ "camera": { "width": 1024, "height": 768 } }"#);
    assert!(VerifierConfig::load(Some(oversized.path())).is_err());

    let no_band = config_file(r#"{ "display": { "draw_buffer_lines": 0 } }"#);
    assert!(VerifierConfig::load(Some(no_band.path())).is_err());

    let no_timeout = config_file(r#"{ "camera": { "timeout_ms": 0 } }"#);
    assert!(VerifierConfig::load(Some(no_timeout.path())).is_err());
}

#[test]
fn unreadable_or_malformed_files_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let garbage = config_file("{ not json");
    assert!(VerifierConfig::load(Some(garbage.path())).is_err());

    let missing = garbage.path().with_extension("absent");
    assert!(VerifierConfig::load(Some(&missing)).is_err());
}
