#![no_main]
use fusebridge::modules::config::Config;
use fusebridge::MemFs;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(config_str) = std::str::from_utf8(data) {
        // Try to parse as a configuration
        if let Ok(config) = serde_json::from_str::<Config>(config_str) {
            let _ = config.ttl();
            let mut fs = MemFs::default().with_ttl(config.ttl());
            for seed in &config.files {
                // Rejected paths are fine, panics are not
                let _ = fs.seed_file(&seed.path, seed.content.as_bytes());
            }
        }
    }
});
