//! Per-order state machine.
//!
//! Init -> WaitingToStart -> Serving -> Finished | Abandoned
//!
//! The worker runs on its own thread, owns its order, and persists every
//! transition through the store as it happens. Every loop is paced by the
//! sample delay and checks the cancel token first.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mixbot_traits::{Clock, SharedClock};
use tracing::{debug, error, info, warn};

use crate::cancel::{CancelToken, StopCause};
use crate::config::ArtistConfig;
use crate::error::{AbandonReason, PumpError};
use crate::io::{Button, Indicator};
use crate::order::{Dose, Order, OrderId, OrderStatus};
use crate::pumps::PumpController;
use crate::store::OrderStore;
use crate::telemetry::{Phase, Published};
use crate::weight::{WaitOutcome, WeightModule};

/// Hardware handed to the worker for the duration of an order.
pub struct Station {
    pub weight: WeightModule,
    pub start_button: Option<Button>,
}

pub(crate) fn lock_station(station: &Mutex<Station>) -> MutexGuard<'_, Station> {
    station
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl From<StopCause> for AbandonReason {
    fn from(cause: StopCause) -> Self {
        match cause {
            StopCause::EmergencyStop => AbandonReason::Cancelled,
            StopCause::InterruptButton => AbandonReason::Interrupted,
        }
    }
}

type Step<T = ()> = Result<T, AbandonReason>;

pub struct OrderWorker {
    pub order_id: OrderId,
    pub store: Arc<dyn OrderStore>,
    pub station: Arc<Mutex<Station>>,
    pub pumps: Arc<PumpController>,
    pub indicator: Arc<Indicator>,
    pub config: Arc<ArtistConfig>,
    pub cancel: CancelToken,
    pub phase: Published<Phase>,
    pub clock: SharedClock,
}

impl OrderWorker {
    /// Drive the order to a terminal status and return it.
    pub fn run(self) -> OrderStatus {
        let mut order = match self.store.order(self.order_id) {
            Ok(o) => o,
            Err(e) => {
                error!(order = self.order_id, error = %e, "cannot load order");
                self.pumps.stop_all();
                self.indicator.off();
                self.phase.set(Phase::Abandoned(AbandonReason::Store));
                return OrderStatus::Abandoned;
            }
        };
        let mut station = lock_station(&self.station);
        match self.serve(&mut order, &mut station) {
            Ok(()) => self.finish(&mut order),
            Err(reason) => self.abandon(&mut order, reason),
        }
        order.status
    }

    fn cancelled(&self) -> Step {
        match self.cancel.cause() {
            Some(cause) => Err(cause.into()),
            None => Ok(()),
        }
    }

    fn persist(&self, order: &Order) -> Step {
        self.store.save_order(order).map_err(|e| {
            error!(order = order.id, error = %e, "cannot persist order");
            AbandonReason::Store
        })
    }

    /// Advance and persist; the in-memory order only moves once saved.
    fn transition(&self, order: &mut Order, next: OrderStatus) -> Step {
        let mut updated = order.clone();
        if let Err(e) = updated.advance_to(next) {
            error!(order = order.id, error = %e, "refused transition");
            return Err(AbandonReason::Store);
        }
        self.persist(&updated)?;
        info!(order = order.id, status = %next, "order status");
        *order = updated;
        Ok(())
    }

    fn sleep_cancellable(&self, total: Duration) -> Step {
        let slice = self.config.weight.sample_delay.max(Duration::from_millis(1));
        let start = self.clock.now();
        loop {
            self.cancelled()?;
            let elapsed = self.clock.elapsed_since(start);
            if elapsed >= total {
                return Ok(());
            }
            self.clock.sleep(slice.min(total - elapsed));
        }
    }

    /// Settled reading with a fresh queue; retries until it gets one.
    fn baseline(&self, station: &mut Station) -> Step<f64> {
        match station.weight.stable_weight(true, 0, &self.cancel) {
            Ok(Some(w)) => Ok(w),
            Ok(None) => {
                self.cancelled()?;
                Err(AbandonReason::SensorUnavailable)
            }
            Err(e) => {
                error!(error = %e, "weight sensor failed");
                Err(AbandonReason::SensorUnavailable)
            }
        }
    }

    fn serve(&self, order: &mut Order, station: &mut Station) -> Step {
        self.phase.set(Phase::Preparing);
        // accept_order persists WaitingToStart together with the accepted flag
        if order.status == OrderStatus::Init {
            self.transition(order, OrderStatus::WaitingToStart)?;
        }
        self.indicator.blink();
        let baseline = self.baseline(station)?;
        self.wait_for_trigger(station, baseline)?;

        self.phase.set(Phase::Starting);
        self.sleep_cancellable(self.config.serving.delay_before_serving)?;
        self.transition(order, OrderStatus::Serving)?;
        self.indicator.on();

        let mix = order.mix.ok_or(AbandonReason::NoMix)?;
        let doses = self.store.ordered_doses(mix).map_err(|e| {
            error!(order = order.id, error = %e, "cannot load doses");
            AbandonReason::Store
        })?;
        let total = doses.len();
        for (idx, dose) in doses.iter().enumerate() {
            self.serve_dose(order, station, idx + 1, total, dose)?;
        }
        Ok(())
    }

    fn wait_for_trigger(&self, station: &mut Station, baseline: f64) -> Step {
        let serving = &self.config.serving;
        let by_button = serving.start_with_button && station.start_button.is_some();
        self.phase.set(if by_button {
            Phase::WaitingForButton
        } else {
            Phase::WaitingForGlass
        });
        if let Some(button) = station.start_button.as_mut() {
            // a press left over from the previous order must not start this one
            button.reset();
        }
        let start = self.clock.now();
        loop {
            self.cancelled()?;
            if by_button {
                if station.start_button.as_mut().is_some_and(Button::is_pressed) {
                    info!("start button pressed");
                    return Ok(());
                }
            } else {
                match station.weight.current_weight() {
                    Ok(Some(w)) if w - baseline > serving.glass_detection_value => {
                        info!(weight = w, baseline, "glass detected");
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "weight read failed while waiting for glass"),
                }
            }
            if self.clock.elapsed_since(start) > serving.glass_detection_timeout {
                if serving.ignore_missing_glass {
                    info!("no glass detected; serving anyway");
                    return Ok(());
                }
                return Err(AbandonReason::NoGlass);
            }
            self.clock.sleep(self.config.weight.sample_delay);
        }
    }

    fn serve_dose(
        &self,
        order: &mut Order,
        station: &mut Station,
        nth: usize,
        total: usize,
        dose: &Dose,
    ) -> Step {
        self.cancelled()?;
        let ingredient = self.store.ingredient(dose.ingredient).map_err(|e| {
            error!(error = %e, "cannot load ingredient");
            AbandonReason::Store
        })?;
        if ingredient.added_separately {
            info!(ingredient = %ingredient.name, "added separately");
            self.phase.set(Phase::AddSeparately {
                ingredient: ingredient.name.clone(),
            });
            order.doses_served += 1;
            return self.persist(order);
        }

        let dispenser = self
            .store
            .dispensers_for(ingredient.id)
            .map_err(|e| {
                error!(error = %e, "cannot load dispensers");
                AbandonReason::Store
            })?
            .into_iter()
            .find(|d| d.is_usable_for(ingredient.id))
            .ok_or(AbandonReason::NoDispenser)?;
        let pump = usize::from(dispenser.number);

        let baseline = self.baseline(station)?;
        self.pumps.start(pump).map_err(|e| match e {
            PumpError::Busy { .. } => AbandonReason::PumpBusy,
            PumpError::UnknownPump(_) => AbandonReason::NoDispenser,
        })?;
        self.phase.set(Phase::Serving {
            dose: nth,
            of: total,
            pump,
        });
        info!(order = order.id, pump, quantity = dose.quantity, baseline, "pouring");

        let serving = &self.config.serving;
        let outcome = station.weight.wait_until(
            |w| w - baseline > dose.quantity,
            serving.serving_timeout,
            self.config.weight.sample_delay,
            &self.cancel,
        );
        if let Err(e) = self.pumps.stop(pump) {
            warn!(pump, error = %e, "pump stop failed");
        }

        match outcome {
            Ok(WaitOutcome::Met(w)) => {
                debug!(pump, poured = w - baseline, "dose complete");
                self.sleep_cancellable(serving.delay_between_servings)?;
                order.doses_served += 1;
                self.persist(order)
            }
            Ok(WaitOutcome::TimedOut(last)) => {
                let gained = last.map_or(0.0, |w| w - baseline);
                warn!(pump, gained, "pour timed out");
                if gained < serving.empty_threshold && serving.mark_empty_on_timeout {
                    if let Err(e) = self.store.set_dispenser_empty(dispenser.number, true) {
                        error!(error = %e, "cannot flag dispenser empty");
                    } else {
                        warn!(dispenser = dispenser.number, "dispenser marked empty");
                    }
                    return Err(AbandonReason::DispenserEmpty);
                }
                Err(AbandonReason::ServingTimeout)
            }
            Ok(WaitOutcome::Cancelled(_)) => {
                self.cancelled()?;
                Err(AbandonReason::Cancelled)
            }
            Err(e) => {
                error!(error = %e, "weight sensor failed while pouring");
                Err(AbandonReason::SensorUnavailable)
            }
        }
    }

    fn finish(&self, order: &mut Order) {
        self.indicator.off();
        if let Err(reason) = self.transition(order, OrderStatus::Finished) {
            self.abandon(order, reason);
            return;
        }
        self.phase.set(Phase::Finished);
        info!(order = order.id, doses = order.doses_served, "order finished");
    }

    fn abandon(&self, order: &mut Order, reason: AbandonReason) {
        self.pumps.stop_all();
        self.indicator.off();
        warn!(order = order.id, %reason, "order abandoned");
        if let Err(e) = order.advance_to(OrderStatus::Abandoned) {
            error!(order = order.id, error = %e, "cannot abandon order");
        }
        order.abandon_reason = Some(reason);
        if let Err(e) = self.store.save_order(order) {
            error!(order = order.id, error = %e, "cannot persist abandoned order");
        }
        self.phase.set(Phase::Abandoned(reason));
    }
}
