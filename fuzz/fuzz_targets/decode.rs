#![no_main]
use libfuzzer_sys::fuzz_target;
use routecloak::{HasherRegistry, RawHasherConfig};

fuzz_target!(|data: &[u8]| {
    let registry = HasherRegistry::new();
    registry
        .register(
            "fuzz",
            RawHasherConfig::new()
                .with_salt("fuzz-salt")
                .with_min_hash_length(8),
        )
        .unwrap();
    let converter = registry.converter("fuzz").unwrap();
    let _ = converter.decode(&String::from_utf8_lossy(data));
});
