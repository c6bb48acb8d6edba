#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(catalog) = mixbot_config::load_catalog(data) {
        let _ = catalog.validate();
        let _ = catalog.mix_by_name("x");
    }
});
