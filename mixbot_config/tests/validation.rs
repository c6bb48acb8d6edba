use std::io::Write;

use mixbot_config::{load_path, load_toml};
use rstest::rstest;

const BASE: &str = r#"
[pins]
hx711_dt = 5
hx711_sck = 6
pumps = [17, 27, 22, 23, 24, 25]
start_button = 16
interrupt_button = 20
indicator = 21
"#;

fn with(extra: &str) -> String {
    format!("{BASE}\n{extra}")
}

#[test]
fn minimal_config_uses_defaults() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("defaults are valid");
    assert_eq!(cfg.weight.queue_len, 10);
    assert_eq!(cfg.weight.sample_delay_ms, 20);
    assert_eq!(cfg.serving.glass_detection_timeout_ms, 10_000);
    assert_eq!(cfg.serving.delay_before_serving_ms, 2_000);
    assert_eq!(cfg.serving.delay_between_servings_ms, 1_000);
    assert!(cfg.safety.single_pump_lock);
    assert_eq!(cfg.calibration.channel, 'A');
    assert_eq!(cfg.calibration.gain, 128);
    // Twice the resolvable minimum unless overridden
    assert!((cfg.empty_threshold() - 2.0).abs() < f64::EPSILON);
}

#[test]
fn explicit_empty_threshold_wins() {
    let cfg = load_toml(&with("[serving]\nempty_threshold = 0.5\n")).expect("parse");
    cfg.validate().expect("valid");
    assert!((cfg.empty_threshold() - 0.5).abs() < f64::EPSILON);
}

#[rstest]
#[case("[weight]\nqueue_len = 0\n", "weight.queue_len must be >= 1")]
#[case("[weight]\nsample_delay_ms = 0\n", "weight.sample_delay_ms must be >= 1")]
#[case("[weight]\nmin_detection = 0.0\n", "weight.min_detection must be > 0")]
#[case("[calibration]\nratio = 0.0\n", "calibration.ratio must be finite and non-zero")]
#[case("[calibration]\nchannel = \"B\"\ngain = 128\n", "calibration.channel/gain")]
#[case("[serving]\nserving_timeout_ms = 0\n", "serving.serving_timeout_ms must be >= 1")]
#[case("[serving]\nglass_detection_value = -1.0\n", "serving.glass_detection_value must be >= 0")]
#[case("[buttons]\nbounce_ms = 500\nhold_ms = 100\n", "buttons.hold_ms must be >= buttons.bounce_ms")]
#[case("[cleaning]\ndrain_delta = -5.0\n", "cleaning.drain_delta must be > 0")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation must be one of")]
fn rejects_invalid_sections(#[case] extra: &str, #[case] needle: &str) {
    let cfg = load_toml(&with(extra)).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[test]
fn rejects_pin_assigned_twice() {
    let toml = r#"
[pins]
hx711_dt = 5
hx711_sck = 6
pumps = [17, 5]
"#;
    let cfg = load_toml(toml).expect("parse");
    let err = cfg.validate().expect_err("GPIO 5 reused");
    assert!(format!("{err}").contains("GPIO 5 is assigned more than once"));
}

#[test]
fn button_start_needs_a_button() {
    let toml = r#"
[pins]
hx711_dt = 5
hx711_sck = 6
pumps = [17]

[serving]
start_with_button = true
"#;
    let cfg = load_toml(toml).expect("parse");
    assert!(cfg.validate().is_err());
}

#[test]
fn missing_pins_section_is_a_parse_error() {
    assert!(load_toml("[weight]\nqueue_len = 5\n").is_err());
}

#[test]
fn load_path_reads_and_validates() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(file, "{}", with("[weight]\nqueue_len = 0\n")).expect("write");
    let err = load_path(file.path()).expect_err("invalid");
    assert!(format!("{err:#}").contains("queue_len"));

    let mut good = tempfile::NamedTempFile::new().expect("tempfile");
    write!(good, "{BASE}").expect("write");
    let cfg = load_path(good.path()).expect("valid");
    assert_eq!(cfg.pins.pumps.len(), 6);
}
