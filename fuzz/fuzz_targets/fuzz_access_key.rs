#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(key) = efactura::core::AccessKey::parse(s) {
            // Accessors must not panic on any key that parsed.
            let _ = key.issue_date();
            let _ = key.document_type();
            let _ = key.sequential();
            let _ = key.environment();
            assert_eq!(efactura::core::AccessKey::parse(key.as_str()).ok(), Some(key));
        }
    }
});
