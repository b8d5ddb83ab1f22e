//! Fuzz target for agent config parsing.
//!
//! Config files are operator input; malformed TOML must surface as an
//! error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pk_core::config::AgentConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = AgentConfig::parse(s) {
            let _ = config.capture_options(Default::default()).validate();
        }
    }
});
