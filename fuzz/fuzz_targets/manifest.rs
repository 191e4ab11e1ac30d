#![no_main]

use autograder_descriptors::manifest::ModuleManifest;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(manifest) = ModuleManifest::parse(s, "fuzz.lst") else {
        return;
    };

    // every source line is kept, interpreted or not
    assert_eq!(manifest.original_lines.len(), s.split_inclusive('\n').count());
    let interpreted = manifest.original_lines.iter().filter(|l| l.interpreted).count();
    assert_eq!(interpreted, manifest.binary_count());
});
