#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Authority responses are untrusted: errors are fine, panics are bugs.
        let _ = efactura::submit::soap::parse_reception(s);
        let _ = efactura::submit::soap::parse_authorization(s);
    }
});
