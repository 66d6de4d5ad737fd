#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        let report = relgate_core::schema::check(&value, "fuzz.json", true);
        if report.pass {
            // Anything that passes the check must also load into a registry.
            if let Ok(config) =
                serde_json::from_value::<relgate_core::spec::ReleaseConfig>(value)
            {
                let _ = relgate_engine::registry::Registry::from_config(&config);
            }
        }
    }
});
