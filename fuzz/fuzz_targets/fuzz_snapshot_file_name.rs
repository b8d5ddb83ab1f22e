//! Fuzz target for snapshot file-name parsing.
//!
//! Directory listings contain arbitrary names; parsing must reject them
//! without panicking, and anything accepted must agree with the name.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pk_storage::parse_snapshot_file_name;

fuzz_target!(|data: &[u8]| {
    if let Ok(name) = std::str::from_utf8(data) {
        if let Some(parsed) = parse_snapshot_file_name(name) {
            assert!(name.starts_with(&parsed.prefix));
            assert!(name.contains(&parsed.profile));
        }
    }
});
