#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Settings parsing, validation and engine assembly must reject bad input without panicking.
    let Ok(settings) = dosemath_config::load_toml(data) else {
        return;
    };
    if settings.validate().is_err() {
        return;
    }
    let _ = dosemath_core::DoseEngine::from_settings(&settings);
});
