#![no_main]

use libfuzzer_sys::fuzz_target;
use regwhen_config::Config;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = toml::from_str::<Config>(s)
        && config.validate().is_ok()
    {
        // A valid config always has an active registry.
        assert!(config.active_registry().is_ok());
    }
});
