#![no_main]

use libfuzzer_sys::fuzz_target;
use regwhen_core::manifest::{Manifest, parse_versions, section_yanked};
use regwhen_core::resolve::resolve;
use regwhen_types::VersionSpecifier;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let all = parse_versions(text, true);
    let live = parse_versions(text, false);
    assert!(live.len() <= all.len());
    assert!(live.iter().all(|e| !e.yanked));

    let Ok(manifest) = Manifest::parse("Fuzz", text) else {
        assert!(all.is_empty());
        return;
    };

    let latest = resolve(&manifest, &VersionSpecifier::Latest).expect("non-empty manifest");
    assert_eq!(Some(&latest), all.last().map(|e| &e.version));

    // Exact lookups always resolve to themselves.
    for entry in &all {
        let spec = VersionSpecifier::Version(entry.version.clone());
        if let Ok(resolved) = resolve(&manifest, &spec) {
            assert_eq!(resolved, entry.version);
        }
        let _ = section_yanked(text, &entry.version);
    }
});
