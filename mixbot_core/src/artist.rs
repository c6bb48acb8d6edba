//! Controller façade: one order at a time.
//!
//! The `Artist` owns every hardware handle, accepts orders, spawns one
//! worker thread per accepted order, and exposes the maintenance operations
//! (tare, calibrate, clean, manual pump) that share the busy flag with
//! orders. Emergency stop works from any thread, busy or not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use eyre::{Result, WrapErr};
use mixbot_hardware::Hx711;
use mixbot_traits::{Clock, InputPin, MonotonicClock, OutputPin, PinFactory, Scale, SharedClock};
use serde::Serialize;
use tracing::{info, warn};

use crate::calibration::Calibration;
use crate::cancel::{CancelToken, StopCause};
use crate::config::ArtistConfig;
use crate::error::{BarError, BuildError, Rejection};
use crate::io::{Button, ButtonWatcher, Indicator};
use crate::order::{Order, OrderId, OrderStatus};
use crate::pumps::PumpController;
use crate::store::{OrderStore, mix_available};
use crate::telemetry::{ArtistStatus, Phase, Published, WeightSnapshot};
use crate::weight::{WaitOutcome, WeightModule};
use crate::worker::{OrderWorker, Station, lock_station};

/// How long a reload waits for a maintenance operation to give way.
const RELOAD_WAIT: Duration = Duration::from_secs(5);
const IDLE_POLL: Duration = Duration::from_millis(2);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds the busy flag; releasing happens on drop, so a panicking worker
/// still frees the controller.
struct BusyGuard {
    busy: Arc<AtomicBool>,
    current_order: Published<Option<OrderId>>,
}

impl BusyGuard {
    fn acquire(busy: &Arc<AtomicBool>, current_order: &Published<Option<OrderId>>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                busy: busy.clone(),
                current_order: current_order.clone(),
            })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.current_order.set(None);
        self.busy.store(false, Ordering::Release);
    }
}

/// Every hardware handle acquired for one configuration.
struct Hardware {
    // joined before the pumps it stops are released
    _watcher: Option<ButtonWatcher>,
    station: Arc<Mutex<Station>>,
    pumps: Arc<PumpController>,
    indicator: Arc<Indicator>,
    weight: Published<WeightSnapshot>,
}

#[derive(Clone)]
struct Parts {
    station: Arc<Mutex<Station>>,
    pumps: Arc<PumpController>,
    indicator: Arc<Indicator>,
}

fn claim_input(pins: &dyn PinFactory, role: &'static str, pin: u8) -> Result<Box<dyn InputPin>, BuildError> {
    pins.input(pin).map_err(|e| BuildError::Pin {
        role,
        pin,
        reason: e.to_string(),
    })
}

fn claim_output(pins: &dyn PinFactory, role: &'static str, pin: u8) -> Result<Box<dyn OutputPin>, BuildError> {
    pins.output(pin).map_err(|e| BuildError::Pin {
        role,
        pin,
        reason: e.to_string(),
    })
}

fn acquire_hardware(
    pins: &dyn PinFactory,
    cfg: &ArtistConfig,
    clock: &SharedClock,
    cancel_slot: &Arc<Mutex<Option<CancelToken>>>,
) -> Result<Hardware, BuildError> {
    if cfg.pins.pumps.is_empty() {
        return Err(BuildError::InvalidConfig("no pumps configured"));
    }
    let dout = claim_input(pins, "hx711_dt", cfg.pins.hx711_dt)?;
    let sck = claim_output(pins, "hx711_sck", cfg.pins.hx711_sck)?;
    let cell = Hx711::new(dout, sck, cfg.calibration.gain, clock.clone())
        .with_ready_polls(cfg.weight.ready_polls);
    let scale: Box<dyn Scale> = Box::new(cell);
    let weight = WeightModule::new(scale, cfg.calibration, &cfg.weight, clock.clone());
    let snapshot = weight.snapshot();

    let start_button = cfg
        .pins
        .start_button
        .map(|pin| claim_input(pins, "start_button", pin))
        .transpose()?
        .map(|pin| Button::new(pin, &cfg.buttons, clock.clone()));

    let outputs = cfg
        .pins
        .pumps
        .iter()
        .map(|&pin| claim_output(pins, "pump", pin))
        .collect::<Result<Vec<_>, _>>()?;
    let pumps = Arc::new(PumpController::new(outputs, cfg.single_pump_lock));

    let led = cfg
        .pins
        .indicator
        .map(|pin| claim_output(pins, "indicator", pin))
        .transpose()?;
    let indicator = Arc::new(Indicator::new(
        led,
        cfg.indicator.blink_on,
        cfg.indicator.blink_off,
    ));

    let watcher = match cfg.pins.interrupt_button {
        Some(pin) => {
            // Real time: the watcher must not drive a simulated clock forward.
            let button = Button::new(
                claim_input(pins, "interrupt_button", pin)?,
                &cfg.buttons,
                MonotonicClock::shared(),
            );
            let slot = cancel_slot.clone();
            let pumps = pumps.clone();
            let watcher = ButtonWatcher::spawn(button, cfg.buttons.hold, cfg.buttons.poll, move || {
                if let Some(token) = lock(&slot).as_ref() {
                    token.cancel(StopCause::InterruptButton);
                }
                pumps.stop_all();
            })
            .map_err(|e| BuildError::Thread("interrupt watcher", e.to_string()))?;
            Some(watcher)
        }
        None => None,
    };

    Ok(Hardware {
        _watcher: watcher,
        station: Arc::new(Mutex::new(Station {
            weight,
            start_button,
        })),
        pumps,
        indicator,
        weight: snapshot,
    })
}

/// Outcome of cleaning one pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanResult {
    /// Weight dropped; the operator advanced to the next pump.
    Drained,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanStep {
    pub pump: usize,
    pub result: CleanResult,
}

pub struct Artist {
    pins: Arc<dyn PinFactory>,
    store: Arc<dyn OrderStore>,
    clock: SharedClock,
    config: RwLock<Arc<ArtistConfig>>,
    hardware: RwLock<Option<Hardware>>,
    busy: Arc<AtomicBool>,
    cancel: Arc<Mutex<Option<CancelToken>>>,
    worker: Mutex<Option<JoinHandle<OrderStatus>>>,
    phase: Published<Phase>,
    current_order: Published<Option<OrderId>>,
}

impl Artist {
    /// Claim every pin named in `config` and start the interrupt watcher.
    pub fn new(
        pins: Arc<dyn PinFactory>,
        store: Arc<dyn OrderStore>,
        config: ArtistConfig,
        clock: SharedClock,
    ) -> Result<Self, BuildError> {
        let cancel = Arc::new(Mutex::new(None));
        let hardware = acquire_hardware(pins.as_ref(), &config, &clock, &cancel)?;
        info!(pumps = config.pins.pumps.len(), "controller ready");
        Ok(Self {
            pins,
            store,
            clock,
            config: RwLock::new(Arc::new(config)),
            hardware: RwLock::new(Some(hardware)),
            busy: Arc::new(AtomicBool::new(false)),
            cancel,
            worker: Mutex::new(None),
            phase: Published::default(),
            current_order: Published::default(),
        })
    }

    pub fn config(&self) -> Arc<ArtistConfig> {
        read(&self.config).clone()
    }

    pub fn calibration(&self) -> Calibration {
        self.config().calibration
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn parts(&self) -> Result<Parts, BarError> {
        read(&self.hardware)
            .as_ref()
            .map(|hw| Parts {
                station: hw.station.clone(),
                pumps: hw.pumps.clone(),
                indicator: hw.indicator.clone(),
            })
            .ok_or(BarError::NoHardware)
    }

    fn busy_guard(&self) -> Option<BusyGuard> {
        BusyGuard::acquire(&self.busy, &self.current_order)
    }

    /// Take the busy flag and install a fresh cancel token under the cancel
    /// lock, so an emergency stop lands either before the job or on its token.
    fn begin_job(&self) -> Option<(BusyGuard, CancelToken)> {
        let mut slot = lock(&self.cancel);
        let guard = self.busy_guard()?;
        let token = CancelToken::new();
        *slot = Some(token.clone());
        Some((guard, token))
    }

    fn reject(&self, mut order: Order, why: Rejection) -> Result<(), Rejection> {
        warn!(order = order.id, reason = %why, "order rejected");
        if order.accepted {
            order.accepted = false;
            if let Err(e) = self.store.save_order(&order) {
                warn!(order = order.id, error = %e, "cannot persist rejection");
            }
        }
        Err(why)
    }

    /// Entry point for a newly submitted order.
    pub fn accept_order(&self, mut order: Order) -> Result<(), Rejection> {
        let Some((guard, cancel)) = self.begin_job() else {
            return self.reject(order, Rejection::Busy);
        };
        let Some(mix) = order.mix else {
            return self.reject(order, Rejection::NoMix);
        };
        match mix_available(self.store.as_ref(), mix) {
            Ok(true) => {}
            Ok(false) => return self.reject(order, Rejection::MixUnavailable),
            Err(e) => return self.reject(order, Rejection::Store(e)),
        }
        let Ok(parts) = self.parts() else {
            return self.reject(order, Rejection::NoHardware);
        };

        if order.advance_to(OrderStatus::WaitingToStart).is_err() {
            // already ran once; its stored record stays as it is
            warn!(order = order.id, status = %order.status, "order resubmitted");
            return Err(Rejection::NotNew(order.status));
        }
        order.accepted = true;
        self.store.save_order(&order)?;

        self.reap_worker();
        let worker = OrderWorker {
            order_id: order.id,
            store: self.store.clone(),
            station: parts.station,
            pumps: parts.pumps,
            indicator: parts.indicator,
            config: self.config(),
            cancel,
            phase: self.phase.clone(),
            clock: self.clock.clone(),
        };
        self.current_order.set(Some(order.id));
        let spawned = thread::Builder::new()
            .name(format!("order-{}", order.id))
            .spawn(move || {
                let _busy = guard;
                worker.run()
            });
        match spawned {
            Ok(handle) => {
                info!(order = order.id, mix, "order accepted");
                *lock(&self.worker) = Some(handle);
                Ok(())
            }
            Err(e) => {
                // never ran: roll back to a fresh, refused order
                order.status = OrderStatus::Init;
                self.reject(order, Rejection::Spawn(e.to_string()))
            }
        }
    }

    /// Cancel whatever is running and cut power to every pump.
    pub fn emergency_stop(&self) {
        if let Some(token) = lock(&self.cancel).as_ref() {
            token.cancel(StopCause::EmergencyStop);
        }
        if let Some(hw) = read(&self.hardware).as_ref() {
            hw.pumps.stop_all();
        }
        warn!("emergency stop");
    }

    fn reap_worker(&self) {
        if let Some(handle) = lock(&self.worker).take() {
            match handle.join() {
                Ok(status) => info!(%status, "worker exited"),
                Err(_) => warn!("worker thread panicked"),
            }
        }
    }

    /// Wait (real time) until no order or maintenance job is running.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let clock = MonotonicClock::new();
        let start = clock.now();
        while self.is_busy() {
            if clock.elapsed_since(start) >= timeout {
                return false;
            }
            clock.sleep(IDLE_POLL);
        }
        self.reap_worker();
        true
    }

    /// Stop everything, release every hardware handle, then claim them again
    /// for `config`. On failure the controller is left without hardware.
    pub fn reload_with_new_config(&self, config: ArtistConfig) -> Result<()> {
        info!("reloading configuration");
        if let Some(token) = lock(&self.cancel).as_ref() {
            token.cancel(StopCause::EmergencyStop);
        }
        self.reap_worker();

        let clock = MonotonicClock::new();
        let start = clock.now();
        let _busy = loop {
            if let Some(g) = self.busy_guard() {
                break g;
            }
            if clock.elapsed_since(start) >= RELOAD_WAIT {
                return Err(eyre::Report::new(BarError::Busy)).wrap_err("reload");
            }
            clock.sleep(IDLE_POLL);
        };

        let mut hw = write(&self.hardware);
        if let Some(old) = hw.as_ref() {
            old.pumps.stop_all();
        }
        // every line must be free before the new layout claims it
        *hw = None;
        let fresh = acquire_hardware(self.pins.as_ref(), &config, &self.clock, &self.cancel)
            .wrap_err("reload: acquire hardware")?;
        *hw = Some(fresh);
        drop(hw);

        *write(&self.config) = Arc::new(config);
        *lock(&self.cancel) = None;
        self.phase.set(Phase::Idle);
        info!("configuration reloaded");
        Ok(())
    }

    fn store_calibration(&self, calibration: Calibration) {
        let mut cfg = write(&self.config);
        let mut next = ArtistConfig::clone(&cfg);
        next.calibration = calibration;
        *cfg = Arc::new(next);
    }

    /// Zero the scale. Refused while busy.
    pub fn tare(&self) -> Result<f64> {
        let _busy = self.busy_guard().ok_or(BarError::Busy)?;
        let parts = self.parts()?;
        let mut station = lock_station(&parts.station);
        let offset = station.weight.tare()?;
        self.store_calibration(station.weight.calibration());
        Ok(offset)
    }

    /// Derive the ratio from `known` weight units on the tared scale.
    pub fn calibrate(&self, known: f64) -> Result<Calibration> {
        let _busy = self.busy_guard().ok_or(BarError::Busy)?;
        let parts = self.parts()?;
        let mut station = lock_station(&parts.station);
        station.weight.calibrate(known)?;
        let cal = station.weight.calibration();
        self.store_calibration(cal);
        Ok(cal)
    }

    /// Take `samples` readings and return the resulting snapshot.
    pub fn weigh(&self, samples: usize) -> Result<WeightSnapshot> {
        let _busy = self.busy_guard().ok_or(BarError::Busy)?;
        let parts = self.parts()?;
        let mut station = lock_station(&parts.station);
        let delay = station.weight.sample_delay();
        for _ in 0..samples.max(1) {
            station.weight.sample()?;
            self.clock.sleep(delay);
        }
        Ok(station.weight.snapshot().get())
    }

    /// Run one pump for `duration`. Refused while busy; emergency stop ends
    /// it early.
    pub fn manual_pump(&self, pump: usize, duration: Duration) -> Result<()> {
        let (_busy, cancel) = self.begin_job().ok_or(BarError::Busy)?;
        let parts = self.parts()?;
        let slice = self.config().weight.sample_delay.max(Duration::from_millis(1));
        parts.pumps.start(pump)?;
        self.phase.set(Phase::Maintenance);
        info!(pump, ms = duration.as_millis() as u64, "manual pump");
        let start = self.clock.now();
        while !cancel.is_cancelled() {
            let elapsed = self.clock.elapsed_since(start);
            if elapsed >= duration {
                break;
            }
            self.clock.sleep(slice.min(duration - elapsed));
        }
        parts.pumps.stop(pump)?;
        self.phase.set(Phase::Idle);
        Ok(())
    }

    /// Flush every pump from `start_at`: each runs until the weight drops by
    /// the drain delta (lift the glass to advance) or its timeout elapses.
    pub fn clean_pumps(&self, start_at: usize) -> Result<Vec<CleanStep>> {
        let (_busy, cancel) = self.begin_job().ok_or(BarError::Busy)?;
        let parts = self.parts()?;
        let cfg = self.config();
        let mut station = lock_station(&parts.station);
        let mut steps = Vec::new();

        for pump in start_at..parts.pumps.pump_count() {
            if cancel.is_cancelled() {
                break;
            }
            self.phase.set(Phase::Cleaning { pump });
            let Some(baseline) = station.weight.stable_weight(true, 0, &cancel)? else {
                steps.push(CleanStep {
                    pump,
                    result: CleanResult::Cancelled,
                });
                break;
            };
            parts.pumps.start(pump)?;
            let outcome = station.weight.wait_until(
                |w| baseline - w > cfg.cleaning.drain_delta,
                cfg.cleaning.timeout,
                cfg.weight.sample_delay,
                &cancel,
            );
            parts.pumps.stop(pump)?;
            let result = match outcome? {
                WaitOutcome::Met(_) => CleanResult::Drained,
                WaitOutcome::TimedOut(_) => CleanResult::TimedOut,
                WaitOutcome::Cancelled(_) => CleanResult::Cancelled,
            };
            info!(pump, ?result, "pump cleaned");
            steps.push(CleanStep { pump, result });
            if result == CleanResult::Cancelled {
                break;
            }
        }
        parts.pumps.stop_all();
        self.phase.set(Phase::Idle);
        Ok(steps)
    }

    pub fn status(&self) -> ArtistStatus {
        let weight = read(&self.hardware)
            .as_ref()
            .map(|hw| hw.weight.get())
            .unwrap_or_default();
        ArtistStatus {
            busy: self.is_busy(),
            current_order: self.current_order.get(),
            phase: self.phase.get().to_string(),
            raw: weight.raw,
            weight: weight.weight,
            queue: weight.queue,
        }
    }

    /// Pump currently energized, if any.
    pub fn active_pump(&self) -> Option<usize> {
        read(&self.hardware)
            .as_ref()
            .and_then(|hw| hw.pumps.active())
    }
}

impl Drop for Artist {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.cancel).as_ref() {
            token.cancel(StopCause::EmergencyStop);
        }
        self.reap_worker();
    }
}
