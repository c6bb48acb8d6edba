mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{Bar, GIN_TONIC, PUMP_PINS, config};
use mixbot_core::{BarError, Calibration, CleanResult, CleanStep, OrderStatus, OrderStore};
use mixbot_traits::PinFactory;
use rstest::rstest;

fn uncalibrated() -> mixbot_core::ArtistConfig {
    let mut cfg = config();
    cfg.calibration = Calibration::default();
    cfg
}

fn is_busy_error(err: &eyre::Report) -> bool {
    matches!(err.downcast_ref::<BarError>(), Some(BarError::Busy))
}

#[test]
fn tare_then_calibrate_with_a_known_load() {
    let bar = Bar::simulated(uncalibrated());
    let offset = bar.artist.tare().expect("tare");
    assert!((offset - 8000.0).abs() < 1e-9);

    bar.cell.set_load(100.0);
    let cal = bar.artist.calibrate(100.0).expect("calibrate");
    assert!((cal.ratio - 0.1).abs() < 1e-9);
    assert_eq!(bar.artist.calibration(), cal);

    bar.cell.set_load(250.0);
    let snap = bar.artist.weigh(10).expect("weigh");
    let weight = snap.weight.expect("in range");
    assert!((weight - 250.0).abs() < 1e-6, "weight {weight}");
    assert_eq!(snap.queue.len(), 10);
}

#[rstest]
#[case::zero(0.0)]
#[case::negative(-5.0)]
#[case::nan(f64::NAN)]
fn calibrate_rejects_bad_known_weight(#[case] known: f64) {
    let bar = Bar::simulated(uncalibrated());
    bar.artist.tare().expect("tare");
    let err = bar.artist.calibrate(known).expect_err("refused");
    assert!(matches!(
        err.downcast_ref::<BarError>(),
        Some(BarError::Calibration(_))
    ));
    assert_eq!(bar.artist.calibration().ratio, 1.0);
}

#[test]
fn maintenance_is_refused_during_an_order() {
    let bar = Bar::real_time(config());
    let order = bar.order(GIN_TONIC);
    bar.artist.accept_order(order.clone()).expect("accepted");

    assert!(is_busy_error(&bar.artist.tare().expect_err("busy")));
    assert!(is_busy_error(&bar.artist.calibrate(10.0).expect_err("busy")));
    assert!(is_busy_error(&bar.artist.weigh(1).expect_err("busy")));
    assert!(is_busy_error(&bar.artist.clean_pumps(0).expect_err("busy")));
    assert!(is_busy_error(
        &bar.artist
            .manual_pump(0, Duration::from_millis(10))
            .expect_err("busy")
    ));

    bar.artist.emergency_stop();
    bar.finish(order.id);
}

#[test]
fn manual_pump_runs_until_its_duration_or_a_stop() {
    let bar = Bar::real_time(config());
    thread::scope(|s| {
        let run = s.spawn(|| bar.artist.manual_pump(2, Duration::from_secs(5)));
        let start = Instant::now();
        while bar.artist.active_pump() != Some(2) {
            assert!(start.elapsed() < Duration::from_secs(2), "pump never started");
            thread::sleep(Duration::from_millis(2));
        }
        assert!(bar.pins.level(PUMP_PINS[2]));
        assert!(bar.artist.is_busy());
        bar.artist.emergency_stop();
        run.join().expect("join").expect("manual pump");
        assert!(start.elapsed() < Duration::from_secs(2));
    });
    assert!(bar.no_pump_running());
    assert!(!bar.artist.is_busy());
}

#[test]
fn manual_pump_with_simulated_time() {
    let bar = Bar::simulated(config());
    bar.artist
        .manual_pump(1, Duration::from_millis(1500))
        .expect("manual pump");
    assert!(bar.no_pump_running());
    assert!(bar.artist.manual_pump(42, Duration::from_millis(1)).is_err());
    assert!(!bar.artist.is_busy());
}

#[test]
fn cleaning_advances_when_the_weight_drops() {
    let bar = Bar::simulated(config());
    bar.cell.set_load(1000.0);
    for pump in 0..PUMP_PINS.len() {
        bar.flow(pump, -30.0);
    }
    let steps = bar.artist.clean_pumps(0).expect("clean");
    assert_eq!(steps.len(), PUMP_PINS.len());
    for (i, step) in steps.iter().enumerate() {
        assert_eq!(step.pump, i);
        assert_eq!(step.result, CleanResult::Drained);
    }
    assert!(bar.no_pump_running());
    assert_eq!(bar.artist.status().phase, "idle");
}

#[test]
fn cleaning_resumes_at_a_pump_and_times_out_on_dry_ones() {
    let bar = Bar::simulated(config());
    bar.cell.set_load(1000.0);
    bar.flow(5, -30.0);
    let steps = bar.artist.clean_pumps(4).expect("clean");
    assert_eq!(
        steps,
        vec![
            CleanStep {
                pump: 4,
                result: CleanResult::TimedOut,
            },
            CleanStep {
                pump: 5,
                result: CleanResult::Drained,
            },
        ]
    );
    assert!(bar.artist.clean_pumps(PUMP_PINS.len()).expect("nothing").is_empty());
}

#[test]
fn reload_moves_every_claim_to_the_new_layout() {
    let bar = Bar::simulated(config());
    assert!(bar.pins.is_claimed(common::INDICATOR));

    let mut next = config();
    next.pins.indicator = Some(26);
    next.pins.pumps = PUMP_PINS.iter().rev().copied().collect();
    bar.artist.reload_with_new_config(next).expect("reload");

    assert!(!bar.pins.is_claimed(common::INDICATOR));
    assert!(bar.pins.is_claimed(26));
    assert!(PUMP_PINS.iter().all(|&p| bar.pins.is_claimed(p)));
    assert_eq!(bar.artist.config().pins.indicator, Some(26));

    // pump 3 now drives what used to be pump 2's line
    bar.cell.add_flow(PUMP_PINS[2], 4.0);
    bar.cell.add_flow(PUMP_PINS[0], 4.0);
    bar.press_start();
    let order = bar.order(GIN_TONIC);
    bar.artist.accept_order(order.clone()).expect("accepted");
    assert_eq!(bar.finish(order.id).status, OrderStatus::Finished);
}

#[test]
fn failed_reload_leaves_the_controller_without_hardware() {
    let bar = Bar::simulated(config());
    let squatter = bar.pins.output(30).expect("claim");

    let mut next = config();
    next.pins.pumps.push(30);
    let err = bar.artist.reload_with_new_config(next.clone()).expect_err("pin taken");
    assert!(format!("{err:#}").contains("30"), "{err:#}");

    assert_eq!(
        bar.artist.accept_order(bar.order(GIN_TONIC)),
        Err(mixbot_core::Rejection::NoHardware)
    );
    let err = bar.artist.tare().expect_err("no hardware");
    assert!(matches!(
        err.downcast_ref::<BarError>(),
        Some(BarError::NoHardware)
    ));

    drop(squatter);
    bar.artist.reload_with_new_config(next).expect("reload");
    assert!(bar.pins.is_claimed(30));
}

#[test]
fn reload_cancels_a_running_order() {
    let bar = Bar::real_time(config());
    let order = bar.order(GIN_TONIC);
    bar.artist.accept_order(order.clone()).expect("accepted");
    bar.artist.reload_with_new_config(config()).expect("reload");
    let done = bar.store.order(order.id).expect("stored");
    assert_eq!(done.status, OrderStatus::Abandoned);
    assert!(!bar.artist.is_busy());
}

#[test]
fn status_serializes_for_the_presentation_layer() {
    let bar = Bar::simulated(config());
    bar.cell.set_load(42.0);
    bar.artist.weigh(3).expect("weigh");
    let status = serde_json::to_value(bar.artist.status()).expect("json");
    assert_eq!(status["busy"], false);
    assert_eq!(status["phase"], "idle");
    assert!(status["current_order"].is_null());
    assert!((status["weight"].as_f64().expect("weight") - 42.0).abs() < 1e-6);
    assert_eq!(status["queue"].as_array().map(Vec::len), Some(3));

    let step = serde_json::to_value(CleanStep {
        pump: 4,
        result: CleanResult::TimedOut,
    })
    .expect("json");
    assert_eq!(step, serde_json::json!({"pump": 4, "result": "timed_out"}));
}

#[test]
fn controller_construction_fails_on_a_taken_pin() {
    let pins = mixbot_hardware::SimPinFactory::new();
    let _held = pins.input(common::START_BUTTON).expect("claim");
    let err = mixbot_core::Artist::new(
        Arc::new(pins),
        common::store(),
        config(),
        mixbot_traits::MonotonicClock::shared(),
    )
    .err()
    .expect("pin in use");
    assert!(matches!(
        err,
        mixbot_core::BuildError::Pin {
            role: "start_button",
            ..
        }
    ));
}
