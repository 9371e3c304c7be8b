#![no_main]

use frankenengine_conformance::LegacyAttributes;
use frankenengine_conformance::catalog::FixtureCatalog;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(legacy) = LegacyAttributes::parse(text) {
        let reparsed = LegacyAttributes::parse(&legacy.to_string()).expect("display reparses");
        assert_eq!(reparsed, legacy);
    }

    let Ok(catalog) = FixtureCatalog::parse(text) else {
        return;
    };
    assert!(!catalog.is_empty());
    assert_eq!(catalog.fixtures().len(), catalog.len());
    // A validated catalog survives a TOML round trip unchanged.
    let encoded = toml::to_string(&catalog).expect("encode catalog");
    let decoded = FixtureCatalog::parse(&encoded).expect("reparse catalog");
    assert_eq!(decoded, catalog);
});
