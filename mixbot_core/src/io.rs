//! Debounced buttons, the indicator LED, and the interrupt-button watcher.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use mixbot_traits::{Clock, InputPin, OutputPin, SharedClock};
use tracing::{debug, info, warn};

use crate::config::ButtonSettings;

/// A push button with time-based debouncing.
///
/// A level change is accepted once it has persisted for `bounce`; shorter
/// glitches are ignored.
pub struct Button {
    pin: Box<dyn InputPin>,
    active_low: bool,
    bounce: Duration,
    clock: SharedClock,
    stable: bool,
    candidate: bool,
    since: Instant,
    pressed_since: Option<Instant>,
}

impl Button {
    pub fn new(pin: Box<dyn InputPin>, settings: &ButtonSettings, clock: SharedClock) -> Self {
        let since = clock.now();
        Self {
            pin,
            active_low: settings.active_low,
            bounce: settings.bounce,
            clock,
            stable: false,
            candidate: false,
            since,
            pressed_since: None,
        }
    }

    fn raw_pressed(&self) -> bool {
        self.pin.is_high() != self.active_low
    }

    /// Sample the line and return the debounced state.
    pub fn poll(&mut self) -> bool {
        let now = self.clock.now();
        let raw = self.raw_pressed();
        if raw != self.candidate {
            self.candidate = raw;
            self.since = now;
        }
        if self.candidate != self.stable
            && now.saturating_duration_since(self.since) >= self.bounce
        {
            self.stable = self.candidate;
            self.pressed_since = self.stable.then_some(self.since);
        }
        self.stable
    }

    /// Forget the debounced state. A press counts again only once it has
    /// lasted `bounce` from now on.
    pub fn reset(&mut self) {
        self.stable = false;
        self.candidate = self.raw_pressed();
        self.since = self.clock.now();
        self.pressed_since = None;
    }

    pub fn is_pressed(&mut self) -> bool {
        self.poll()
    }

    /// How long the button has been held down, if it is.
    pub fn held_for(&mut self) -> Option<Duration> {
        if !self.poll() {
            return None;
        }
        self.pressed_since.map(|t| self.clock.elapsed_since(t))
    }
}

/// What the indicator is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorMode {
    Off,
    On,
    Blinking,
}

type SharedPin = Arc<Mutex<Box<dyn OutputPin>>>;

fn drive(pin: &SharedPin, high: bool) {
    let mut guard = pin.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.write(high);
}

/// Blink thread. Dropping the sender wakes it immediately.
struct Blinker {
    stop: Option<xch::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl Blinker {
    fn spawn(pin: SharedPin, on: Duration, off: Duration) -> std::io::Result<Self> {
        let (tx, rx) = xch::bounded::<()>(0);
        let join = thread::Builder::new()
            .name("indicator-blink".into())
            .spawn(move || {
                let mut lit = true;
                loop {
                    drive(&pin, lit);
                    let wait = if lit { on } else { off };
                    match rx.recv_timeout(wait) {
                        Err(xch::RecvTimeoutError::Timeout) => lit = !lit,
                        _ => break,
                    }
                }
            })?;
        Ok(Self {
            stop: Some(tx),
            join: Some(join),
        })
    }
}

impl Drop for Blinker {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.join.take()
            && handle.join().is_err()
        {
            warn!("indicator blink thread panicked");
        }
    }
}

struct IndicatorState {
    mode: IndicatorMode,
    blinker: Option<Blinker>,
}

/// Status LED. Without a pin every call only records the mode.
pub struct Indicator {
    pin: Option<SharedPin>,
    blink_on: Duration,
    blink_off: Duration,
    state: Mutex<IndicatorState>,
}

impl Indicator {
    pub fn new(pin: Option<Box<dyn OutputPin>>, blink_on: Duration, blink_off: Duration) -> Self {
        let pin = pin.map(|p| Arc::new(Mutex::new(p)));
        if let Some(p) = &pin {
            drive(p, false);
        }
        Self {
            pin,
            blink_on,
            blink_off,
            state: Mutex::new(IndicatorState {
                mode: IndicatorMode::Off,
                blinker: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, IndicatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mode(&self) -> IndicatorMode {
        self.state().mode
    }

    fn set_steady(&self, high: bool) {
        let mut st = self.state();
        // join the blink thread before taking over the line
        st.blinker = None;
        if let Some(p) = &self.pin {
            drive(p, high);
        }
        st.mode = if high {
            IndicatorMode::On
        } else {
            IndicatorMode::Off
        };
    }

    pub fn on(&self) {
        self.set_steady(true);
    }

    pub fn off(&self) {
        self.set_steady(false);
    }

    pub fn blink(&self) {
        let mut st = self.state();
        if st.mode == IndicatorMode::Blinking {
            return;
        }
        st.blinker = None;
        if let Some(p) = &self.pin {
            match Blinker::spawn(p.clone(), self.blink_on, self.blink_off) {
                Ok(b) => st.blinker = Some(b),
                Err(e) => {
                    warn!(error = %e, "cannot spawn blink thread; indicator left on");
                    drive(p, true);
                }
            }
        }
        st.mode = IndicatorMode::Blinking;
    }
}

impl Drop for Indicator {
    fn drop(&mut self) {
        self.off();
    }
}

/// Background thread that fires `on_hold` once per long press.
///
/// Polls every `poll`; the callback runs on the watcher thread and must not
/// block for long. Dropping the watcher stops and joins the thread.
pub struct ButtonWatcher {
    stop: Option<xch::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl ButtonWatcher {
    pub fn spawn<F>(
        mut button: Button,
        hold: Duration,
        poll: Duration,
        on_hold: F,
    ) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = xch::bounded::<()>(0);
        let join = thread::Builder::new()
            .name("interrupt-button".into())
            .spawn(move || {
                let mut fired = false;
                loop {
                    match button.held_for() {
                        Some(held) if held >= hold && !fired => {
                            info!(held_ms = held.as_millis() as u64, "interrupt button held");
                            fired = true;
                            on_hold();
                        }
                        None => fired = false,
                        Some(_) => {}
                    }
                    match rx.recv_timeout(poll) {
                        Err(xch::RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                }
                debug!("interrupt watcher exiting");
            })?;
        Ok(Self {
            stop: Some(tx),
            join: Some(join),
        })
    }
}

impl Drop for ButtonWatcher {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.join.take()
            && handle.join().is_err()
        {
            warn!("interrupt watcher thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mixbot_hardware::SimPinFactory;
    use mixbot_traits::{ManualClock, MonotonicClock, PinFactory};

    use super::*;

    const PIN: u8 = 16;

    fn settings(bounce_ms: u64) -> ButtonSettings {
        ButtonSettings {
            active_low: true,
            bounce: Duration::from_millis(bounce_ms),
            hold: Duration::from_millis(200),
            poll: Duration::from_millis(2),
        }
    }

    fn released(pins: &SimPinFactory) {
        pins.set_level(PIN, true);
    }

    fn pressed(pins: &SimPinFactory) {
        pins.set_level(PIN, false);
    }

    #[test]
    fn glitch_shorter_than_bounce_is_ignored() {
        let pins = SimPinFactory::new();
        released(&pins);
        let clock = ManualClock::new();
        let mut button = Button::new(
            pins.input(PIN).expect("claim"),
            &settings(50),
            Arc::new(clock.clone()),
        );
        assert!(!button.poll());
        pressed(&pins);
        assert!(!button.poll());
        clock.advance(Duration::from_millis(30));
        released(&pins);
        assert!(!button.poll());
        clock.advance(Duration::from_millis(100));
        assert!(!button.poll());
    }

    #[test]
    fn reset_forgets_an_earlier_press() {
        let pins = SimPinFactory::new();
        released(&pins);
        let clock = ManualClock::new();
        let mut button = Button::new(
            pins.input(PIN).expect("claim"),
            &settings(50),
            Arc::new(clock.clone()),
        );
        pressed(&pins);
        button.poll();
        clock.advance(Duration::from_millis(60));
        assert!(button.poll());

        // released, but not for a full bounce period yet
        released(&pins);
        clock.advance(Duration::from_millis(10));
        assert!(button.poll());

        button.reset();
        assert!(!button.poll());
        clock.advance(Duration::from_millis(100));
        assert!(!button.poll());

        pressed(&pins);
        assert!(!button.poll());
        clock.advance(Duration::from_millis(50));
        assert!(button.poll());
    }

    #[test]
    fn press_is_accepted_after_bounce() {
        let pins = SimPinFactory::new();
        released(&pins);
        let clock = ManualClock::new();
        let mut button = Button::new(
            pins.input(PIN).expect("claim"),
            &settings(50),
            Arc::new(clock.clone()),
        );
        pressed(&pins);
        assert!(!button.poll());
        clock.advance(Duration::from_millis(50));
        assert!(button.is_pressed());
        clock.advance(Duration::from_millis(150));
        assert_eq!(button.held_for(), Some(Duration::from_millis(200)));
        released(&pins);
        assert!(button.poll());
        clock.advance(Duration::from_millis(50));
        assert_eq!(button.held_for(), None);
    }

    #[test]
    fn active_high_wiring() {
        let pins = SimPinFactory::new();
        let clock = ManualClock::new();
        let mut cfg = settings(0);
        cfg.active_low = false;
        let mut button = Button::new(pins.input(PIN).expect("claim"), &cfg, Arc::new(clock));
        assert!(!button.poll());
        pins.set_level(PIN, true);
        assert!(button.poll());
    }

    #[test]
    fn indicator_modes_drive_the_pin() {
        let pins = SimPinFactory::new();
        let led = Indicator::new(
            Some(pins.output(21).expect("claim")),
            Duration::from_millis(5),
            Duration::from_millis(5),
        );
        led.on();
        assert!(pins.level(21));
        assert_eq!(led.mode(), IndicatorMode::On);
        led.blink();
        assert_eq!(led.mode(), IndicatorMode::Blinking);
        thread::sleep(Duration::from_millis(30));
        led.off();
        assert_eq!(led.mode(), IndicatorMode::Off);
        // blink thread is joined, nothing drives the line any more
        thread::sleep(Duration::from_millis(20));
        assert!(!pins.level(21));
    }

    #[test]
    fn indicator_without_pin_tracks_mode() {
        let led = Indicator::new(None, Duration::from_millis(5), Duration::from_millis(5));
        led.blink();
        assert_eq!(led.mode(), IndicatorMode::Blinking);
        led.off();
        assert_eq!(led.mode(), IndicatorMode::Off);
    }

    #[test]
    fn watcher_fires_once_per_long_press() {
        let pins = SimPinFactory::new();
        released(&pins);
        let button = Button::new(
            pins.input(PIN).expect("claim"),
            &settings(5),
            MonotonicClock::shared(),
        );
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();
        let watcher = ButtonWatcher::spawn(
            button,
            Duration::from_millis(40),
            Duration::from_millis(2),
            move || {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        )
        .expect("spawn");

        // a tap does nothing
        pressed(&pins);
        thread::sleep(Duration::from_millis(15));
        released(&pins);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        pressed(&pins);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        released(&pins);
        drop(watcher);
        assert!(!pins.is_claimed(PIN));
    }
}
