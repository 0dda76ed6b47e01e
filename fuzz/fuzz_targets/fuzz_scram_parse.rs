#![no_main]

use duckdb_pgwire::auth::scram::{parse_client_final, parse_client_first};
use duckdb_pgwire::auth::{ScramSecret, ScramServer};
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;

#[derive(Debug)]
struct ScramInput {
    client_first: Vec<u8>,
    client_final: Vec<u8>,
}

impl<'a> Arbitrary<'a> for ScramInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            client_first: u.arbitrary()?,
            client_final: u.arbitrary()?,
        })
    }
}

fuzz_target!(|input: ScramInput| {
    if let Ok(text) = std::str::from_utf8(&input.client_first) {
        let _ = parse_client_first(text);
    }
    if let Ok(text) = std::str::from_utf8(&input.client_final) {
        let _ = parse_client_final(text);
    }

    // Low iteration count keeps each run fast
    let secret = ScramSecret::derive("duck", b"fuzz-salt", 1);
    if let Ok((_, exchange)) = ScramServer::new(secret).server_first(&input.client_first) {
        // Random proofs must never verify
        assert!(exchange.server_final(&input.client_final).is_err());
    }
});
