mod common;

use std::time::{Duration, Instant};

use common::{Bar, GIN_TONIC, INTERRUPT_BUTTON, config};
use mixbot_core::{AbandonReason, OrderStatus, OrderStore};

fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn emergency_stop_ends_a_waiting_order_within_a_poll() {
    let mut cfg = config();
    cfg.weight.sample_delay = Duration::from_millis(10);
    let bar = Bar::real_time(cfg);
    let order = bar.order(GIN_TONIC);
    bar.artist.accept_order(order.clone()).expect("accepted");
    wait_for("button wait", || {
        bar.artist.status().phase == "press button to start"
    });

    let t0 = Instant::now();
    bar.artist.emergency_stop();
    assert!(bar.artist.wait_idle(Duration::from_secs(1)));
    assert!(t0.elapsed() < Duration::from_millis(250), "{:?}", t0.elapsed());

    let done = bar.store.order(order.id).expect("stored");
    assert_eq!(done.status, OrderStatus::Abandoned);
    assert_eq!(done.abandon_reason, Some(AbandonReason::Cancelled));
}

#[test]
fn emergency_stop_mid_pour_cuts_the_pump() {
    let mut cfg = config();
    cfg.weight.sample_delay = Duration::from_millis(5);
    cfg.serving.delay_before_serving = Duration::ZERO;
    let bar = Bar::real_time(cfg);
    bar.press_start();
    let order = bar.order(GIN_TONIC);
    bar.artist.accept_order(order.clone()).expect("accepted");
    wait_for("pour", || bar.artist.active_pump() == Some(3));
    assert!(bar.pins.level(common::PUMP_PINS[3]));

    bar.artist.emergency_stop();
    assert!(!bar.pins.level(common::PUMP_PINS[3]));
    let done = bar.finish(order.id);
    assert_eq!(done.abandon_reason, Some(AbandonReason::Cancelled));
    assert_eq!(done.doses_served, 0);
    // a cancelled pour says nothing about the bottle
    assert!(bar.store.dispensers().iter().all(|d| !d.is_empty));
    assert!(bar.no_pump_running());
}

#[test]
fn emergency_stop_while_idle_is_harmless() {
    let bar = Bar::simulated(config());
    bar.artist.emergency_stop();
    assert!(!bar.artist.is_busy());
    bar.press_start();
    let order = bar.order(common::LIME_ONLY);
    bar.artist.accept_order(order.clone()).expect("accepted");
    assert_eq!(bar.finish(order.id).status, OrderStatus::Finished);
}

#[test]
fn holding_the_interrupt_button_abandons() {
    let mut cfg = config();
    cfg.pins.interrupt_button = Some(INTERRUPT_BUTTON);
    cfg.buttons.bounce = Duration::from_millis(5);
    cfg.buttons.hold = Duration::from_millis(50);
    cfg.buttons.poll = Duration::from_millis(5);
    cfg.weight.sample_delay = Duration::from_millis(5);
    let bar = Bar::real_time(cfg);
    let order = bar.order(GIN_TONIC);
    bar.artist.accept_order(order.clone()).expect("accepted");
    wait_for("button wait", || {
        bar.artist.status().phase == "press button to start"
    });

    bar.pins.set_level(INTERRUPT_BUTTON, false);
    let done = bar.finish(order.id);
    bar.pins.set_level(INTERRUPT_BUTTON, true);
    assert_eq!(done.abandon_reason, Some(AbandonReason::Interrupted));
}

#[test]
fn a_short_tap_on_the_interrupt_button_is_ignored() {
    let mut cfg = config();
    cfg.pins.interrupt_button = Some(INTERRUPT_BUTTON);
    cfg.buttons.bounce = Duration::from_millis(5);
    cfg.buttons.hold = Duration::from_millis(500);
    cfg.buttons.poll = Duration::from_millis(5);
    let bar = Bar::real_time(cfg);
    let order = bar.order(GIN_TONIC);
    bar.artist.accept_order(order.clone()).expect("accepted");

    bar.pins.set_level(INTERRUPT_BUTTON, false);
    std::thread::sleep(Duration::from_millis(60));
    bar.pins.set_level(INTERRUPT_BUTTON, true);
    std::thread::sleep(Duration::from_millis(100));
    assert!(bar.artist.is_busy());

    bar.artist.emergency_stop();
    assert_eq!(
        bar.finish(order.id).abandon_reason,
        Some(AbandonReason::Cancelled)
    );
}

#[test]
fn dropping_the_controller_stops_the_worker() {
    let bar = Bar::real_time(config());
    let order = bar.order(GIN_TONIC);
    bar.artist.accept_order(order.clone()).expect("accepted");
    let store = bar.store.clone();
    drop(bar);
    let done = store.order(order.id).expect("stored");
    assert_eq!(done.status, OrderStatus::Abandoned);
}
