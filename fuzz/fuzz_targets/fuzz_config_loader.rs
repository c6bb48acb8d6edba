#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse errors and validation errors are fine; panics are not.
    if let Ok(cfg) = mixbot_config::load_toml(data) {
        if cfg.validate().is_ok() {
            let _ = cfg.empty_threshold();
        }
    }
});
