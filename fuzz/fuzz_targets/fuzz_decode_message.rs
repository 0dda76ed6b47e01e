#![no_main]

use duckdb_pgwire::protocol::{decode_backend, Decoder, FrontendPhase};
use libfuzzer_sys::fuzz_target;

const PHASES: [FrontendPhase; 5] = [
    FrontendPhase::Startup,
    FrontendPhase::Password,
    FrontendPhase::SaslInitial,
    FrontendPhase::SaslResponse,
    FrontendPhase::Ready,
];

fuzz_target!(|data: &[u8]| {
    let decoder = Decoder::new(64 * 1024);

    // Every phase must consume whole frames or fail cleanly
    for phase in PHASES {
        let mut offset = 0;
        while offset < data.len() {
            match decoder.frontend(&data[offset..], phase) {
                Ok(Some((_, consumed))) => {
                    assert!(consumed > 0 && offset + consumed <= data.len());
                    offset += consumed;
                }
                Ok(None) | Err(_) => break,
            }
        }
    }

    let mut offset = 0;
    while offset < data.len() {
        match decode_backend(&data[offset..]) {
            Ok(Some((_, consumed))) => {
                assert!(consumed > 0);
                offset += consumed;
            }
            Ok(None) | Err(_) => break,
        }
    }
});
