//! Simulated bar shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mixbot_core::config::{PinMap, WeightSettings};
use mixbot_core::{
    Artist, ArtistConfig, Calibration, Dispenser, Dose, InMemoryStore, Ingredient, Mix, Order,
    OrderStatus, OrderStore, StoreError,
};
use mixbot_hardware::{SimLoadCell, SimPinFactory};
use mixbot_traits::{ManualClock, MonotonicClock, SharedClock};

pub const PUMP_PINS: [u8; 6] = [17, 27, 22, 23, 24, 25];
pub const START_BUTTON: u8 = 16;
pub const INTERRUPT_BUTTON: u8 = 20;
pub const INDICATOR: u8 = 21;

pub const GIN: u32 = 1;
pub const TONIC: u32 = 2;
pub const LIME: u32 = 3;
pub const GIN_TONIC: u32 = 10;
pub const LIME_ONLY: u32 = 11;

/// 10 counts per unit around a raw zero of 8000; calibrated to match.
pub fn cell() -> SimLoadCell {
    SimLoadCell::new(8000, 10.0)
}

pub fn config() -> ArtistConfig {
    let mut cfg = ArtistConfig {
        pins: PinMap {
            hx711_dt: 5,
            hx711_sck: 6,
            pumps: PUMP_PINS.to_vec(),
            start_button: Some(START_BUTTON),
            interrupt_button: None,
            indicator: Some(INDICATOR),
        },
        weight: WeightSettings::default(),
        calibration: Calibration {
            offset: 8000.0,
            ratio: 0.1,
            ..Calibration::default()
        },
        ..ArtistConfig::default()
    };
    cfg.serving.start_with_button = true;
    cfg.buttons.bounce = Duration::ZERO;
    cfg
}

/// Gin on dispenser 3, tonic on 5, lime by hand.
pub fn store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for (id, name, by_hand) in [(GIN, "gin", false), (TONIC, "tonic", false), (LIME, "lime", true)] {
        store.add_ingredient(Ingredient {
            id,
            name: name.into(),
            added_separately: by_hand,
        });
    }
    store.add_mix(Mix {
        id: GIN_TONIC,
        name: "Gin Tonic".into(),
        doses: vec![
            Dose {
                ingredient: TONIC,
                quantity: 20.0,
                number: 2,
            },
            Dose {
                ingredient: GIN,
                quantity: 40.0,
                number: 1,
            },
        ],
    });
    store.add_mix(Mix {
        id: LIME_ONLY,
        name: "Lime".into(),
        doses: vec![Dose {
            ingredient: LIME,
            quantity: 1.0,
            number: 1,
        }],
    });
    store.assign_dispenser(3, Some(GIN));
    store.assign_dispenser(5, Some(TONIC));
    store
}

/// Passes everything through to the in-memory store and remembers each
/// saved order state.
pub struct Journal {
    inner: Arc<InMemoryStore>,
    saves: Mutex<Vec<Order>>,
}

impl Journal {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            saves: Mutex::new(Vec::new()),
        }
    }

    /// (status, doses served) of every save of order `id`, oldest first.
    pub fn history(&self, id: u64) -> Vec<(OrderStatus, u32)> {
        self.saves
            .lock()
            .expect("journal lock")
            .iter()
            .filter(|o| o.id == id)
            .map(|o| (o.status, o.doses_served))
            .collect()
    }
}

impl OrderStore for Journal {
    fn order(&self, id: u64) -> Result<Order, StoreError> {
        self.inner.order(id)
    }

    fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        self.inner.save_order(order)?;
        self.saves.lock().expect("journal lock").push(order.clone());
        Ok(())
    }

    fn mix(&self, id: u32) -> Result<Mix, StoreError> {
        self.inner.mix(id)
    }

    fn ingredient(&self, id: u32) -> Result<Ingredient, StoreError> {
        self.inner.ingredient(id)
    }

    fn dispensers_for(&self, ingredient: u32) -> Result<Vec<Dispenser>, StoreError> {
        self.inner.dispensers_for(ingredient)
    }

    fn set_dispenser_empty(&self, number: u8, empty: bool) -> Result<(), StoreError> {
        self.inner.set_dispenser_empty(number, empty)
    }
}

pub struct Bar {
    pub artist: Artist,
    pub store: Arc<InMemoryStore>,
    pub journal: Arc<Journal>,
    pub pins: SimPinFactory,
    pub cell: SimLoadCell,
}

impl Bar {
    pub fn with_clock(cfg: ArtistConfig, clock: SharedClock) -> Self {
        let pins = SimPinFactory::new();
        let cell = cell();
        pins.attach_load_cell(cfg.pins.hx711_dt, cfg.pins.hx711_sck, cell.clone());
        // buttons idle released (pull-up)
        pins.set_level(START_BUTTON, true);
        pins.set_level(INTERRUPT_BUTTON, true);
        let store = store();
        let journal = Arc::new(Journal::new(store.clone()));
        let artist = Artist::new(Arc::new(pins.clone()), journal.clone(), cfg, clock)
            .expect("artist builds");
        Self {
            artist,
            store,
            journal,
            pins,
            cell,
        }
    }

    /// Simulated time: every wait completes instantly.
    pub fn simulated(cfg: ArtistConfig) -> Self {
        Self::with_clock(cfg, Arc::new(ManualClock::new()))
    }

    pub fn real_time(cfg: ArtistConfig) -> Self {
        Self::with_clock(cfg, MonotonicClock::shared())
    }

    /// Every conversion taken while `pump`'s output is high adds `units`.
    pub fn flow(&self, pump: usize, units: f64) {
        self.cell.add_flow(PUMP_PINS[pump], units);
    }

    pub fn press_start(&self) {
        self.pins.set_level(START_BUTTON, false);
    }

    pub fn order(&self, mix: u32) -> mixbot_core::Order {
        self.store.create_order(Some(mix))
    }

    pub fn finish(&self, id: u64) -> mixbot_core::Order {
        assert!(
            self.artist.wait_idle(Duration::from_secs(10)),
            "worker did not finish"
        );
        let order = self.store.order(id).expect("order persisted");
        assert!(order.status.is_terminal(), "status {:?}", order.status);
        order
    }

    pub fn no_pump_running(&self) -> bool {
        PUMP_PINS.iter().all(|&p| !self.pins.level(p)) && self.artist.active_pump().is_none()
    }
}

pub fn assert_finished(order: &mixbot_core::Order) {
    assert_eq!(order.status, OrderStatus::Finished, "{order:?}");
}
