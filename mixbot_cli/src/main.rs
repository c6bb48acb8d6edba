#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `mixbot`: drive the cocktail dispenser from the command line.

mod bar;
mod cli;
mod error_fmt;
mod rt;

use std::time::Duration;

use clap::Parser;
use eyre::{Result, WrapErr};
use mixbot_config::Logging;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Console on stderr (pretty or JSON), plus an optional JSON-lines file.
fn init_tracing(json: bool, level: &str, logging: &Logging) -> Result<()> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);
    layers.push(if json {
        console.json().with_filter(env_filter(level)).boxed()
    } else {
        console.with_filter(env_filter(level)).boxed()
    });

    if let Some(file) = logging.file.as_deref() {
        let path = std::path::Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file must name a file, got '{file}'"))?;
        std::fs::create_dir_all(dir).wrap_err_with(|| format!("create log dir {}", dir.display()))?;
        let appender = match logging.rotation.as_deref().unwrap_or("never") {
            "daily" => tracing_appender::rolling::daily(dir, name),
            "hourly" => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        *FILE_GUARD.lock().unwrap_or_else(|p| p.into_inner()) = Some(guard);
        let file_level = logging.level.as_deref().unwrap_or(level);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(file_level))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .wrap_err("install tracing subscriber")
}

fn run(cli: Cli) -> Result<()> {
    let cfg = mixbot_config::load_path(&cli.config)?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    match cli.cmd {
        Commands::Serve {
            mix,
            rt,
            rt_prio,
            rt_lock,
        } => {
            rt::setup_rt_once(rt, rt_prio, rt_lock);
            let catalog = mixbot_config::load_catalog_path(&cli.catalog)?;
            catalog.check_against(&cfg)?;
            bar::serve(&cfg, &catalog, &mix, cli.json)
        }
        Commands::Tare => bar::tare(&cfg, cli.json),
        Commands::Calibrate { known, wait_ms } => {
            bar::calibrate(&cfg, known, Duration::from_millis(wait_ms), cli.json)
        }
        Commands::Clean { start_at } => bar::clean(&cfg, start_at, cli.json),
        Commands::Pump { id, ms } => bar::pump(&cfg, id, ms, cli.json),
        Commands::Weigh { samples } => bar::weigh(&cfg, samples, cli.json),
        Commands::SelfCheck => bar::self_check(&cfg, cli.json),
    }
}

fn flush_logs() {
    drop(FILE_GUARD.lock().unwrap_or_else(|p| p.into_inner()).take());
}

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let result = run(cli);
    if let Err(err) = &result {
        tracing::error!(error = %format!("{err:#}"), "command failed");
    }
    flush_logs();
    if let Err(err) = result {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}
