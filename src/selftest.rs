//! Power-on self checks behind the `--self-test` flag.
//!
//! Exercises the two subsystems a misbuilt binary would break silently: the
//! frame codec (encode, append, streaming decode, full drain) and the
//! longest-prefix-match resolution of the routing table.

use crate::codec::{RxBuffer, encode_frame};
use crate::datatypes::RouteEntry;
use crate::routing::RouteTable;
use bytes::BytesMut;

pub fn run() -> crate::Result<()> {
    codec_round_trip()?;
    routing_resolution()?;
    Ok(())
}

fn codec_round_trip() -> crate::Result<()> {
    let payload: Vec<u8> = (0u8..32).collect();
    let mut wire = BytesMut::new();
    encode_frame(&mut wire, 256, 1, 0x1234, 42, &payload)?;

    let mut rx = RxBuffer::new();
    rx.append(&wire)?;

    let frame = rx
        .try_decode(64)?
        .ok_or("protocol framing: decoder wanted more data")?;
    if frame.header.seq != 42 || frame.header.flags != 0x1234 {
        return Err("protocol framing: header fields did not survive".into());
    }
    if frame.payload.as_ref() != payload.as_slice() {
        return Err("protocol framing: payload did not survive".into());
    }
    if !rx.is_empty() {
        return Err("protocol framing: buffer not fully drained".into());
    }
    Ok(())
}

fn routing_resolution() -> crate::Result<()> {
    let mut table = RouteTable::new();
    let wide = RouteEntry {
        prefix: [10, 0, 0, 0].into(),
        mask_bits: 8,
        metric: 10,
        next_hop: [10, 0, 0, 1].into(),
        last_updated_ms: 0,
    };
    let narrow = RouteEntry {
        prefix: [10, 1, 0, 0].into(),
        mask_bits: 16,
        metric: 5,
        next_hop: [10, 1, 0, 1].into(),
        last_updated_ms: 0,
    };
    table.upsert(wide)?;
    table.upsert(narrow)?;

    let best = table
        .lookup([10, 1, 2, 3].into())
        .ok_or("routing table: 10.1.2.3 found no route")?;
    if best.mask_bits != 16 || best.next_hop != narrow.next_hop {
        return Err("routing table: 10.1.2.3 did not resolve to the /16".into());
    }

    let best = table
        .lookup([10, 2, 2, 3].into())
        .ok_or("routing table: 10.2.2.3 found no route")?;
    if best.mask_bits != 8 || best.next_hop != wide.next_hop {
        return Err("routing table: 10.2.2.3 did not resolve to the /8".into());
    }
    Ok(())
}
