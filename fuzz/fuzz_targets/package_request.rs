#![no_main]

use libfuzzer_sys::fuzz_target;
use regwhen_types::{PackageRequest, VersionSpecifier};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(req) = s.parse::<PackageRequest>() {
        assert!(!req.name.is_empty());
        if let VersionSpecifier::Version(v) = &req.specifier {
            assert!(!v.is_empty());
        }
        let _ = req.to_string();
    }
});
