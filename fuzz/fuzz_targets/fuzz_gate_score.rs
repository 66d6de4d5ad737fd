#![no_main]
use libfuzzer_sys::fuzz_target;

use relgate_core::spec::ReleaseConfig;
use relgate_engine::gates::evaluator::DefaultGateEvaluator;
use relgate_engine::registry::Registry;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Some(template) = relgate_core::templates::generate("standard") else {
        return;
    };
    let Ok(config) = serde_json::from_value::<ReleaseConfig>(template) else {
        return;
    };
    let Ok(registry) = Registry::from_config(&config) else {
        return;
    };
    for gate in registry.gates() {
        let result = DefaultGateEvaluator.evaluate(gate, &raw);
        assert!((0.0..=1.0).contains(&result.score.value()));
    }
});
