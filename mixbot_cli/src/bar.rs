//! Hardware assembly and command execution.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use eyre::{Result, WrapErr};
use mixbot_config::{CalibrationCfg, Catalog, Config};
use mixbot_core::{
    AbandonReason, Artist, ArtistConfig, CleanResult, InMemoryStore, OrderStatus, OrderStore,
};
use mixbot_hardware::{SimLoadCell, SimPinFactory};
use mixbot_traits::{MonotonicClock, PinFactory};
use serde_json::json;

/// Load added by a simulated glass.
const SIM_GLASS: f64 = 250.0;
/// Starting load for a simulated cleaning run (a glass full of rinse water).
const SIM_RINSE: f64 = 1000.0;
const STATUS_POLL: Duration = Duration::from_millis(100);

/// Units per conversion while a simulated pump runs.
fn sim_flow() -> f64 {
    std::env::var("MIXBOT_SIM_FLOW")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2.0)
}

/// Delay before a simulated glass lands; `never` leaves the scale empty.
fn sim_glass_delay() -> Option<Duration> {
    match std::env::var("MIXBOT_SIM_GLASS_MS") {
        Ok(v) if v.eq_ignore_ascii_case("never") => None,
        Ok(v) => v.parse().ok().map(Duration::from_millis),
        Err(_) => Some(Duration::from_millis(1000)),
    }
}

/// Simulated pumps that move nothing (comma-separated pump ids).
fn sim_dry_pumps() -> Vec<usize> {
    std::env::var("MIXBOT_SIM_DRY")
        .map(|v| v.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default()
}

struct SimBench {
    pins: SimPinFactory,
    cell: SimLoadCell,
    pressed_level: bool,
}

/// The pin factory the controller runs on, plus the simulated scale when
/// there is no real hardware.
pub struct Bench {
    pins: Arc<dyn PinFactory>,
    sim: Option<SimBench>,
}

impl Bench {
    /// `flow_sign` is 1 for pouring, -1 for draining (cleaning).
    #[cfg(all(feature = "hardware", target_os = "linux"))]
    pub fn assemble(_cfg: &Config, _flow_sign: f64) -> Result<Self> {
        let pins = mixbot_hardware::gpio::RppalPinFactory::new().wrap_err("open GPIO")?;
        tracing::info!("using Raspberry Pi GPIO");
        Ok(Self {
            pins: Arc::new(pins),
            sim: None,
        })
    }

    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    pub fn assemble(cfg: &Config, flow_sign: f64) -> Result<Self> {
        Ok(Self::simulated(cfg, flow_sign))
    }

    #[cfg_attr(all(feature = "hardware", target_os = "linux"), allow(dead_code))]
    fn simulated(cfg: &Config, flow_sign: f64) -> Self {
        let pins = SimPinFactory::new();
        // raw = offset + load / ratio, so weight reads back as load
        let cal = &cfg.calibration;
        let cell = SimLoadCell::new(cal.offset.round() as i32, 1.0 / cal.ratio);
        let dry = sim_dry_pumps();
        let flow = sim_flow() * flow_sign;
        for (id, &pin) in cfg.pins.pumps.iter().enumerate() {
            cell.add_flow(pin, if dry.contains(&id) { 0.0 } else { flow });
        }
        pins.attach_load_cell(cfg.pins.hx711_dt, cfg.pins.hx711_sck, cell.clone());
        let released = cfg.buttons.active_low;
        for pin in [cfg.pins.start_button, cfg.pins.interrupt_button]
            .into_iter()
            .flatten()
        {
            pins.set_level(pin, released);
        }
        tracing::info!(flow, ?dry, "using simulated hardware");
        Self {
            pins: Arc::new(pins.clone()),
            sim: Some(SimBench {
                pins,
                cell,
                pressed_level: !released,
            }),
        }
    }

    fn sim_load(&self, units: f64) {
        if let Some(sim) = &self.sim {
            sim.cell.set_load(units);
        }
    }

    /// Stand in for the operator: press start, or put a glass down later.
    fn sim_operator(&self, cfg: &Config) {
        let Some(sim) = &self.sim else {
            return;
        };
        if cfg.serving.start_with_button
            && let Some(pin) = cfg.pins.start_button
        {
            sim.pins.set_level(pin, sim.pressed_level);
            return;
        }
        if let Some(delay) = sim_glass_delay() {
            let cell = sim.cell.clone();
            let _ = thread::Builder::new().name("sim-glass".into()).spawn(move || {
                thread::sleep(delay);
                cell.set_load(cell.load() + SIM_GLASS);
            });
        }
    }
}

fn controller(cfg: &Config, store: Arc<dyn OrderStore>, bench: &Bench) -> Result<Arc<Artist>> {
    let artist = Artist::new(
        bench.pins.clone(),
        store,
        ArtistConfig::from(cfg),
        MonotonicClock::shared(),
    )
    .wrap_err("open hardware")?;
    let artist = Arc::new(artist);
    let weak: Weak<Artist> = Arc::downgrade(&artist);
    ctrlc::set_handler(move || {
        if let Some(a) = weak.upgrade() {
            a.emergency_stop();
        }
    })
    .wrap_err("install Ctrl-C handler")?;
    Ok(artist)
}

fn empty_store() -> Arc<dyn OrderStore> {
    Arc::new(InMemoryStore::new())
}

pub fn serve(cfg: &Config, catalog: &Catalog, mix_name: &str, json_out: bool) -> Result<()> {
    let store = Arc::new(InMemoryStore::from_catalog(catalog));
    let mix = store
        .mix_by_name(mix_name)
        .ok_or_else(|| eyre::eyre!("unknown mix '{mix_name}'"))?;
    let bench = Bench::assemble(cfg, 1.0)?;
    let artist = controller(cfg, store.clone(), &bench)?;

    let order = store.create_order(Some(mix.id));
    let id = order.id;
    artist
        .accept_order(order)
        .map_err(eyre::Report::new)
        .wrap_err_with(|| format!("order for '{}' refused", mix.name))?;
    bench.sim_operator(cfg);

    let mut last_phase = String::new();
    while !artist.wait_idle(STATUS_POLL) {
        let phase = artist.status().phase;
        if phase != last_phase {
            if !json_out {
                println!("{phase}");
            }
            last_phase = phase;
        }
    }

    let done = store.order(id)?;
    let status = done.status.label().to_ascii_lowercase();
    if json_out {
        println!(
            "{}",
            json!({
                "order": done.id,
                "mix": mix.name,
                "status": status,
                "doses_served": done.doses_served,
                "abandon_reason": done.abandon_reason,
            })
        );
    } else {
        println!(
            "Order {} ({}): {}, {} of {} doses served",
            done.id,
            mix.name,
            status,
            done.doses_served,
            mix.doses.len()
        );
    }
    match (done.status, done.abandon_reason) {
        (OrderStatus::Finished, _) => Ok(()),
        (_, reason) => Err(eyre::Report::new(reason.unwrap_or(AbandonReason::Store)))
            .wrap_err(format!("order {id} abandoned")),
    }
}

fn print_calibration(cfg: &CalibrationCfg) -> Result<()> {
    let body = toml::to_string(cfg).wrap_err("render calibration")?;
    println!("[calibration]\n{body}");
    Ok(())
}

pub fn tare(cfg: &Config, json_out: bool) -> Result<()> {
    let bench = Bench::assemble(cfg, 1.0)?;
    let artist = controller(cfg, empty_store(), &bench)?;
    let offset = artist.tare()?;
    let cal = CalibrationCfg::from(&artist.calibration());
    if json_out {
        println!("{}", json!({ "offset": offset, "ratio": cal.ratio }));
        return Ok(());
    }
    println!("Tare complete (offset {offset:.1}). Persist with:");
    print_calibration(&cal)
}

pub fn calibrate(cfg: &Config, known: f64, wait: Duration, json_out: bool) -> Result<()> {
    if !(known.is_finite() && known > 0.0) {
        eyre::bail!("--known must be a positive weight, got {known}");
    }
    let bench = Bench::assemble(cfg, 1.0)?;
    let artist = controller(cfg, empty_store(), &bench)?;
    artist.tare()?;
    if !json_out {
        println!("Place {known} units on the scale...");
    }
    bench.sim_load(known);
    thread::sleep(wait);
    let cal = CalibrationCfg::from(&artist.calibrate(known)?);
    if json_out {
        println!(
            "{}",
            json!({ "offset": cal.offset, "ratio": cal.ratio, "channel": cal.channel.to_string(), "gain": cal.gain })
        );
        return Ok(());
    }
    println!("Calibration complete. Persist with:");
    print_calibration(&cal)
}

pub fn clean(cfg: &Config, start_at: usize, json_out: bool) -> Result<()> {
    if start_at >= cfg.pins.pumps.len() {
        eyre::bail!(
            "--start-at {start_at} is past the last pump ({})",
            cfg.pins.pumps.len().saturating_sub(1)
        );
    }
    let bench = Bench::assemble(cfg, -1.0)?;
    bench.sim_load(SIM_RINSE);
    let artist = controller(cfg, empty_store(), &bench)?;
    let steps = artist.clean_pumps(start_at)?;
    if json_out {
        println!("{}", serde_json::to_string(&steps)?);
    } else {
        for step in &steps {
            let what = match step.result {
                CleanResult::Drained => "drained",
                CleanResult::TimedOut => "timed out",
                CleanResult::Cancelled => "cancelled",
            };
            println!("pump {}: {what}", step.pump);
        }
    }
    if steps.iter().any(|s| s.result == CleanResult::Cancelled) {
        return Err(eyre::Report::new(AbandonReason::Cancelled)).wrap_err("cleaning stopped");
    }
    Ok(())
}

pub fn pump(cfg: &Config, id: usize, ms: u64, json_out: bool) -> Result<()> {
    let bench = Bench::assemble(cfg, 1.0)?;
    let artist = controller(cfg, empty_store(), &bench)?;
    artist
        .manual_pump(id, Duration::from_millis(ms))
        .wrap_err_with(|| format!("run pump {id}"))?;
    if json_out {
        println!("{}", json!({ "pump": id, "ms": ms }));
    } else {
        println!("pump {id} ran for {ms} ms");
    }
    Ok(())
}

pub fn weigh(cfg: &Config, samples: usize, json_out: bool) -> Result<()> {
    let bench = Bench::assemble(cfg, 1.0)?;
    let artist = controller(cfg, empty_store(), &bench)?;
    let snap = artist.weigh(samples)?;
    if json_out {
        println!("{}", serde_json::to_string(&snap)?);
        return Ok(());
    }
    match (snap.raw, snap.weight) {
        (Some(raw), Some(w)) => println!("weight {w:.2} (raw {raw:.0}, {} samples)", snap.queue.len()),
        (Some(raw), None) => println!("raw {raw:.0} is outside the measurable range"),
        _ => eyre::bail!("no sample from the weight sensor"),
    }
    Ok(())
}

pub fn self_check(cfg: &Config, json_out: bool) -> Result<()> {
    let bench = Bench::assemble(cfg, 1.0)?;
    let artist = controller(cfg, empty_store(), &bench)?;
    let snap = artist.weigh(1)?;
    let backend = if bench.sim.is_some() { "sim" } else { "gpio" };
    if json_out {
        println!(
            "{}",
            json!({ "ok": true, "backend": backend, "pumps": cfg.pins.pumps.len(), "raw": snap.raw })
        );
    } else {
        println!(
            "OK: {backend} backend, {} pumps, scale raw {:?}",
            cfg.pins.pumps.len(),
            snap.raw
        );
    }
    Ok(())
}
