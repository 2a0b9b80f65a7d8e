#![no_main]

use libfuzzer_sys::fuzz_target;
use threadscope::prelude::*;

fuzz_target!(|data: &[u8]| {
    let source = MemorySource::new();
    let (logger, _) = Logger::memory();
    let transformer = Transformer::new(Config::default(), None, logger);

    let outcome = transformer.transform(
        &TypeUnderTransformation {
            name: Some("fuzz/Input"),
            display_name: Some("fuzz.Input"),
            bytes: data,
        },
        &source,
    );
    if let Outcome::Rewritten { bytes, .. } = outcome {
        assert!(ClassFile::parse(&bytes).is_ok());
    }
});
