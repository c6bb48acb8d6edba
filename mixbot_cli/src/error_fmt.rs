//! Human-readable error descriptions and structured JSON error formatting.

use mixbot_core::{AbandonReason, BarError, BuildError, PumpError, Rejection};
use mixbot_hardware::HwError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::Pin { role, pin, reason } => format!(
                "What happened: Could not claim GPIO {pin} for {role} ({reason}).\nLikely causes: Another process holds the line, the same pin is listed twice, or the process lacks GPIO permissions.\nHow to fix: Check [pins] in the config and stop other GPIO users; run as a member of the gpio group."
            ),
            BuildError::Thread(what, e) => format!(
                "What happened: The {what} thread could not be started ({e}).\nLikely causes: The system is out of threads or memory.\nHow to fix: Free resources and try again."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/mixbot.toml for a sample."
            ),
        };
    }

    if let Some(reason) = err.downcast_ref::<AbandonReason>() {
        return match reason {
            AbandonReason::Cancelled => "What happened: Emergency stop.\nLikely causes: Ctrl-C or a stop request from the operator.\nHow to fix: Empty the glass if needed and order again.".to_string(),
            AbandonReason::Interrupted => "What happened: The interrupt button was held.\nLikely causes: The operator stopped the order.\nHow to fix: Release the button and order again.".to_string(),
            AbandonReason::NoGlass => "What happened: No glass was detected before the timeout.\nLikely causes: No glass on the scale, glass lighter than serving.glass_detection_value, or an uncalibrated scale.\nHow to fix: Place the glass sooner, calibrate, or raise serving.glass_detection_timeout_ms.".to_string(),
            AbandonReason::DispenserEmpty => "What happened: A dispenser ran dry and was marked empty.\nLikely causes: Empty bottle, kinked hose, or a failed pump.\nHow to fix: Refill the bottle and clear the empty flag in the catalog (is_empty = false).".to_string(),
            AbandonReason::ServingTimeout => "What happened: A pour did not reach its quantity in time.\nLikely causes: Slow pump, almost empty bottle, or serving.serving_timeout_ms too low.\nHow to fix: Check the hose and bottle, or raise serving.serving_timeout_ms.".to_string(),
            AbandonReason::SensorUnavailable => "What happened: The weight sensor stopped answering.\nLikely causes: HX711 wiring, power, or wrong DT/SCK pins.\nHow to fix: Verify pins.hx711_dt / pins.hx711_sck and the 5V/GND wiring.".to_string(),
            other => format!(
                "What happened: The order was abandoned ({other}).\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug for more detail."
            ),
        };
    }

    if let Some(rej) = err.downcast_ref::<Rejection>() {
        return match rej {
            Rejection::MixUnavailable => "What happened: The mix cannot be served right now.\nLikely causes: An ingredient has no loaded dispenser, or its dispenser is marked empty.\nHow to fix: Load or refill the dispenser in the catalog.".to_string(),
            Rejection::Busy => "What happened: Another order is in progress.\nLikely causes: A previous order has not finished yet.\nHow to fix: Wait for it to finish or stop it.".to_string(),
            other => format!(
                "What happened: The order was refused ({other}).\nLikely causes: Catalog or hardware problem.\nHow to fix: Check the catalog file and the logs."
            ),
        };
    }

    if let Some(pe) = err.downcast_ref::<PumpError>() {
        return format!(
            "What happened: {pe}.\nLikely causes: Wrong pump id or a pump still running.\nHow to fix: Pump ids run from 0 to the number of entries in pins.pumps minus one."
        );
    }

    if let Some(BarError::Hardware(_) | BarError::HardwareFault(_) | BarError::Timeout) =
        err.downcast_ref::<BarError>()
    {
        return "What happened: The weight sensor did not produce data.\nLikely causes: Wrong DT/SCK pins, wiring or power issues.\nHow to fix: Check [pins] in the config and verify 5V/GND.".to_string();
    }

    if let Some(HwError::Gpio(msg)) = err.downcast_ref::<HwError>() {
        return format!(
            "What happened: GPIO could not be opened ({msg}).\nLikely causes: Not running on a Raspberry Pi, or missing permissions.\nHow to fix: Run on the Pi as a member of the gpio group, or build without --features hardware to simulate."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains(" must ") || lower.contains("parse") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: Missing [pins], duplicate GPIO numbers, or out-of-range values.\nHow to fix: Edit the TOML and try again."
        );
    }

    if lower.contains("unknown mix") {
        return format!(
            "What happened: {msg}.\nLikely causes: Typo or the mix is missing from the catalog.\nHow to fix: Use one of the [[mixes]] names in the catalog file."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: stops 2, missing glass 3, empty dispenser 4, pour
/// timeout 5, other abandons 6, refusals 7, everything else 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(reason) = err.downcast_ref::<AbandonReason>() {
        return match reason {
            AbandonReason::Cancelled | AbandonReason::Interrupted => 2,
            AbandonReason::NoGlass => 3,
            AbandonReason::DispenserEmpty => 4,
            AbandonReason::ServingTimeout => 5,
            _ => 6,
        };
    }
    if err.downcast_ref::<Rejection>().is_some() {
        return 7;
    }
    1
}

fn reason_name(err: &eyre::Report) -> String {
    if let Some(reason) = err.downcast_ref::<AbandonReason>()
        && let Ok(serde_json::Value::String(name)) = serde_json::to_value(reason)
    {
        return name;
    }
    if err.downcast_ref::<Rejection>().is_some() {
        return "rejected".into();
    }
    "error".into()
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "message": humanize(err),
        "detail": format!("{err:#}"),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AbandonReason::Cancelled, 2, "Emergency stop")]
    #[case(AbandonReason::NoGlass, 3, "No glass")]
    #[case(AbandonReason::DispenserEmpty, 4, "ran dry")]
    #[case(AbandonReason::ServingTimeout, 5, "did not reach")]
    #[case(AbandonReason::PumpBusy, 6, "abandoned")]
    fn abandon_reasons_map_to_codes_and_hints(
        #[case] reason: AbandonReason,
        #[case] code: i32,
        #[case] needle: &str,
    ) {
        let err = eyre::Report::new(reason).wrap_err("order 1 abandoned");
        assert_eq!(exit_code_for_error(&err), code);
        assert!(humanize(&err).contains(needle), "{}", humanize(&err));
    }

    #[test]
    fn json_error_names_the_reason() {
        let err = eyre::Report::new(AbandonReason::DispenserEmpty);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "dispenser_empty");
        assert!(v["message"].as_str().unwrap().starts_with("What happened"));
    }

    #[test]
    fn pin_conflicts_are_explained() {
        let err = eyre::Report::new(BuildError::Pin {
            role: "pump",
            pin: 17,
            reason: "GPIO 17 is already in use".into(),
        })
        .wrap_err("open hardware");
        assert!(humanize(&err).contains("GPIO 17 for pump"));
        assert_eq!(exit_code_for_error(&err), 1);
    }

    #[test]
    fn refusals_exit_with_seven() {
        let err = eyre::Report::new(Rejection::MixUnavailable);
        assert_eq!(exit_code_for_error(&err), 7);
        assert!(humanize(&err).contains("cannot be served"));
    }
}
