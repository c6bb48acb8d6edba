#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core controller logic for the cocktail dispenser (hardware-agnostic).
//!
//! All hardware goes through `mixbot_traits` seams: a `PinFactory` hands out
//! GPIO lines, the HX711 driver turns two of them into a `Scale`.
//!
//! ## Architecture
//!
//! - **Weight**: median-smoothed, calibrated readings and condition waits (`weight`)
//! - **Pumps**: outputs with a single-pump safety lock (`pumps`)
//! - **I/O**: debounced buttons, indicator LED, interrupt watcher (`io`)
//! - **Orders**: status machine and catalog entities (`order`), store seam (`store`)
//! - **Worker**: one thread per accepted order (`worker`)
//! - **Artist**: the controller façade tying it together (`artist`)

pub mod artist;
pub mod calibration;
pub mod cancel;
pub mod config;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod io;
pub mod order;
pub mod pumps;
pub mod store;
pub mod telemetry;
pub mod weight;
pub mod worker;

pub use artist::{Artist, CleanResult, CleanStep};
pub use calibration::Calibration;
pub use cancel::{CancelToken, StopCause};
pub use config::ArtistConfig;
pub use error::{AbandonReason, BarError, BuildError, PumpError, Rejection, StoreError};
pub use order::{Dispenser, Dose, Ingredient, Mix, Order, OrderId, OrderStatus};
pub use pumps::PumpController;
pub use store::{InMemoryStore, OrderStore};
pub use telemetry::{ArtistStatus, Phase, WeightSnapshot};
pub use weight::{WaitOutcome, WeightModule};
