#![no_main]

use bytes::{Buf, BytesMut};
use duckdb_pgwire::protocol::{Decoder, FrontendPhase};
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;

#[derive(Debug)]
struct StreamingInput {
    data: Vec<u8>,
    split_points: Vec<u8>,
}

impl<'a> Arbitrary<'a> for StreamingInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            data: u.arbitrary()?,
            split_points: u.arbitrary()?,
        })
    }
}

/// Decode everything in `data` at once
fn whole(decoder: &Decoder, data: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut offset = 0;
    while let Ok(Some((msg, consumed))) = decoder.frontend(&data[offset..], FrontendPhase::Ready) {
        out.push(format!("{:?}", msg));
        offset += consumed;
    }
    out
}

fuzz_target!(|input: StreamingInput| {
    if input.data.is_empty() {
        return;
    }
    let decoder = Decoder::new(64 * 1024);

    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(0);
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    // Arrival in arbitrary chunks must yield the same messages as all at once
    let mut buf = BytesMut::new();
    let mut chunked = Vec::new();
    'feed: for window in splits.windows(2) {
        buf.extend_from_slice(&input.data[window[0]..window[1]]);
        loop {
            match decoder.frontend(&buf, FrontendPhase::Ready) {
                Ok(Some((msg, consumed))) => {
                    chunked.push(format!("{:?}", msg));
                    buf.advance(consumed);
                }
                Ok(None) => break,
                Err(_) => break 'feed,
            }
        }
    }

    let expected = whole(&decoder, &input.data);
    assert!(expected.starts_with(&chunked));
});
