// ABOUTME: Maps each decoded request frame to exactly one reply frame
// ABOUTME: Owns the routing table, telemetry counters and per-command payload layouts

use crate::codec::FrameHeader;
use crate::datatypes::{MsgType, RouteEntry, RouteStrategy};
use crate::routing::RouteTable;
use crate::telemetry::{Clock, RequestStats};
use bytes::BufMut;
use std::net::Ipv4Addr;
use tracing::debug;

/// Largest inbound payload the dispatcher accepts; anything bigger is a
/// protocol error at decode time.
pub const MAX_REQUEST_PAYLOAD: usize = 4096;

/// Reply scratch size. Echo-class replies are truncated to this, so a 4 KiB
/// PING comes back as its first 2 KiB.
pub const MAX_REPLY_PAYLOAD: usize = 2048;

/// Size of one ROUTE_UPDATE record on the wire.
pub const ROUTE_RECORD_LEN: usize = 16;

/// Byte size of the STATS_REPLY payload.
pub const STATS_REPLY_LEN: usize = 40;

const UNKNOWN_TYPE_MSG: &str = "unknown message type";
const BAD_PAYLOAD_MSG: &str = "bad payload";

/// The single owner of all request-handling state.
///
/// Exactly one of these exists, held by the event loop thread; no interior
/// mutability is needed because nothing else can observe it mid-update.
#[derive(Debug)]
pub struct Dispatcher {
    pub routes: RouteTable,
    pub stats: RequestStats,
    pub clock: Clock,
    strategy: RouteStrategy,
}

impl Dispatcher {
    pub fn new(strategy: RouteStrategy) -> Self {
        Dispatcher {
            routes: RouteTable::new(),
            stats: RequestStats::default(),
            clock: Clock::new(),
            strategy,
        }
    }

    /// Handle one request, writing the reply payload into `reply` (cleared
    /// first, never grown past [`MAX_REPLY_PAYLOAD`]) and returning the reply
    /// type. The caller encodes the frame, echoing the request `seq`.
    ///
    /// Telemetry latency accounting stays with the caller so that encode time
    /// is included in the measured duration.
    pub fn handle(&mut self, header: &FrameHeader, payload: &[u8], reply: &mut Vec<u8>) -> MsgType {
        reply.clear();

        match MsgType::try_from(header.msg_type) {
            Ok(MsgType::Ping) => {
                echo_payload(reply, payload);
                MsgType::Pong
            }
            Ok(MsgType::Echo) => {
                echo_payload(reply, payload);
                MsgType::EchoReply
            }
            Ok(MsgType::GetStats) => {
                self.stats_reply(reply);
                MsgType::StatsReply
            }
            Ok(MsgType::RouteUpdate) => {
                self.apply_route_update(payload, reply);
                MsgType::RouteAck
            }
            Ok(MsgType::RouteLookup) => self.route_lookup(payload, reply),
            _ => {
                debug!(
                    msg_type = header.msg_type,
                    name = MsgType::name(header.msg_type),
                    seq = header.seq,
                    "request with unhandled type"
                );
                error_reply(reply, UNKNOWN_TYPE_MSG)
            }
        }
    }

    fn stats_reply(&self, reply: &mut Vec<u8>) {
        reply.put_u64(self.stats.total_requests);
        reply.put_u64(self.stats.bad_frames);
        reply.put_u64(self.stats.routes_installed);
        reply.put_u64(self.clock.uptime_ms());
        reply.put_u32((self.stats.last_latency_ms * 1000.0) as u32);
        reply.put_u32((self.stats.avg_latency_ms * 1000.0) as u32);
        debug_assert_eq!(reply.len(), STATS_REPLY_LEN);
    }

    /// Consume whole 16-byte records; short trailing bytes are ignored.
    /// Records the table refuses (full, bad mask) are skipped and do not
    /// count toward the acknowledged total.
    fn apply_route_update(&mut self, payload: &[u8], reply: &mut Vec<u8>) {
        let mut applied: u32 = 0;
        let stamp = self.clock.timestamp_ms();

        for record in payload.chunks_exact(ROUTE_RECORD_LEN) {
            let entry = RouteEntry {
                prefix: ipv4_at(record, 0),
                mask_bits: record[4],
                metric: u16::from_be_bytes([record[6], record[7]]),
                next_hop: ipv4_at(record, 8),
                last_updated_ms: stamp,
            };
            if self.routes.upsert(entry).is_ok() {
                applied += 1;
                self.stats.routes_installed += 1;
            }
        }

        reply.put_u32(applied);
    }

    fn route_lookup(&self, payload: &[u8], reply: &mut Vec<u8>) -> MsgType {
        if payload.len() < 4 {
            return error_reply(reply, BAD_PAYLOAD_MSG);
        }
        let ip = ipv4_at(payload, 0);

        let decision = self.strategy.decide();
        debug!(
            %ip,
            strategy = ?decision.strategy,
            hops = decision.hops,
            "route lookup"
        );

        match self.routes.lookup(ip) {
            Some(best) => {
                reply.put_u8(best.mask_bits);
                reply.put_u8(0);
                reply.put_u16(best.metric);
                reply.put_slice(&best.next_hop.octets());
            }
            None => {
                reply.put_u8(0);
                reply.put_u8(0);
                reply.put_u16(0xFFFF);
                reply.put_u32(0);
            }
        }
        MsgType::RouteReply
    }
}

fn echo_payload(reply: &mut Vec<u8>, payload: &[u8]) {
    let n = payload.len().min(MAX_REPLY_PAYLOAD);
    reply.extend_from_slice(&payload[..n]);
}

fn error_reply(reply: &mut Vec<u8>, message: &str) -> MsgType {
    reply.extend_from_slice(message.as_bytes());
    MsgType::Error
}

fn ipv4_at(bytes: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(msg_type: u8, seq: u32, payload_len: u32) -> FrameHeader {
        FrameHeader {
            msg_type,
            flags: 0,
            seq,
            payload_len,
            payload_crc32: 0,
        }
    }

    fn dispatch(dispatcher: &mut Dispatcher, msg_type: u8, payload: &[u8]) -> (MsgType, Vec<u8>) {
        let mut reply = Vec::with_capacity(MAX_REPLY_PAYLOAD);
        let reply_type = dispatcher.handle(
            &header(msg_type, 1, payload.len() as u32),
            payload,
            &mut reply,
        );
        (reply_type, reply)
    }

    #[test]
    fn ping_echoes_payload() {
        let mut d = Dispatcher::new(RouteStrategy::Direct);
        let (reply_type, reply) = dispatch(&mut d, MsgType::Ping as u8, b"hi");
        assert_eq!(reply_type, MsgType::Pong);
        assert_eq!(reply, b"hi");
    }

    #[test]
    fn echo_truncates_large_payload() {
        let mut d = Dispatcher::new(RouteStrategy::Direct);
        let payload = vec![0xAB; MAX_REQUEST_PAYLOAD];
        let (reply_type, reply) = dispatch(&mut d, MsgType::Echo as u8, &payload);
        assert_eq!(reply_type, MsgType::EchoReply);
        assert_eq!(reply.len(), MAX_REPLY_PAYLOAD);
        assert_eq!(reply, payload[..MAX_REPLY_PAYLOAD]);
    }

    #[test]
    fn stats_reply_layout() {
        let mut d = Dispatcher::new(RouteStrategy::Direct);
        d.stats.record_request(1.5);
        d.stats.record_request(2.5);
        d.stats.bad_frames = 3;
        d.stats.routes_installed = 7;

        let (reply_type, reply) = dispatch(&mut d, MsgType::GetStats as u8, b"");
        assert_eq!(reply_type, MsgType::StatsReply);
        assert_eq!(reply.len(), STATS_REPLY_LEN);

        let total = u64::from_be_bytes(reply[0..8].try_into().unwrap());
        let bad = u64::from_be_bytes(reply[8..16].try_into().unwrap());
        let installed = u64::from_be_bytes(reply[16..24].try_into().unwrap());
        let last_us = u32::from_be_bytes(reply[32..36].try_into().unwrap());
        let avg_us = u32::from_be_bytes(reply[36..40].try_into().unwrap());

        assert_eq!(total, 2);
        assert_eq!(bad, 3);
        assert_eq!(installed, 7);
        assert_eq!(last_us, 2500);
        assert_eq!(avg_us, 2000);
    }

    fn route_record(prefix: [u8; 4], mask_bits: u8, metric: u16, next_hop: [u8; 4]) -> [u8; 16] {
        let mut record = [0u8; 16];
        record[0..4].copy_from_slice(&prefix);
        record[4] = mask_bits;
        record[6..8].copy_from_slice(&metric.to_be_bytes());
        record[8..12].copy_from_slice(&next_hop);
        record
    }

    #[test]
    fn route_update_applies_and_acks() {
        let mut d = Dispatcher::new(RouteStrategy::Direct);
        let mut payload = Vec::new();
        payload.extend_from_slice(&route_record([10, 0, 0, 0], 8, 10, [10, 0, 0, 1]));
        payload.extend_from_slice(&route_record([10, 1, 0, 0], 16, 5, [10, 1, 0, 1]));

        let (reply_type, reply) = dispatch(&mut d, MsgType::RouteUpdate as u8, &payload);
        assert_eq!(reply_type, MsgType::RouteAck);
        assert_eq!(reply, 2u32.to_be_bytes());
        assert_eq!(d.routes.len(), 2);
        assert_eq!(d.stats.routes_installed, 2);
    }

    #[test]
    fn route_update_skips_bad_records_and_trailing_bytes() {
        let mut d = Dispatcher::new(RouteStrategy::Direct);
        let mut payload = Vec::new();
        payload.extend_from_slice(&route_record([10, 0, 0, 0], 8, 10, [10, 0, 0, 1]));
        // Mask 40 is invalid; the record is skipped, not acked.
        payload.extend_from_slice(&route_record([10, 1, 0, 0], 40, 5, [10, 1, 0, 1]));
        // Trailing runt record.
        payload.extend_from_slice(&[0xFF; 7]);

        let (reply_type, reply) = dispatch(&mut d, MsgType::RouteUpdate as u8, &payload);
        assert_eq!(reply_type, MsgType::RouteAck);
        assert_eq!(reply, 1u32.to_be_bytes());
        assert_eq!(d.routes.len(), 1);
        assert_eq!(d.stats.routes_installed, 1);
    }

    #[test]
    fn route_lookup_hit() {
        let mut d = Dispatcher::new(RouteStrategy::Direct);
        let update = route_record([10, 0, 0, 0], 8, 10, [10, 0, 0, 1]);
        dispatch(&mut d, MsgType::RouteUpdate as u8, &update);

        let (reply_type, reply) = dispatch(&mut d, MsgType::RouteLookup as u8, &[10, 0, 0, 5]);
        assert_eq!(reply_type, MsgType::RouteReply);
        assert_eq!(reply, [8, 0, 0, 10, 10, 0, 0, 1]);
    }

    #[test]
    fn route_lookup_miss() {
        let mut d = Dispatcher::new(RouteStrategy::Direct);
        let (reply_type, reply) = dispatch(&mut d, MsgType::RouteLookup as u8, &[0, 0, 0, 0]);
        assert_eq!(reply_type, MsgType::RouteReply);
        assert_eq!(reply, [0, 0, 0xFF, 0xFF, 0, 0, 0, 0]);
    }

    #[test]
    fn route_lookup_short_payload_is_an_error_reply() {
        let mut d = Dispatcher::new(RouteStrategy::Direct);
        let (reply_type, reply) = dispatch(&mut d, MsgType::RouteLookup as u8, &[10, 0]);
        assert_eq!(reply_type, MsgType::Error);
        assert_eq!(reply, b"bad payload");
    }

    #[test]
    fn unknown_type_is_an_error_reply() {
        let mut d = Dispatcher::new(RouteStrategy::Direct);
        let (reply_type, reply) = dispatch(&mut d, 99, b"");
        assert_eq!(reply_type, MsgType::Error);
        assert_eq!(reply, b"unknown message type");
    }

    #[test]
    fn reply_codes_are_not_requests() {
        let mut d = Dispatcher::new(RouteStrategy::Direct);
        for reply_code in [MsgType::Pong, MsgType::StatsReply, MsgType::RouteReply] {
            let (reply_type, reply) = dispatch(&mut d, reply_code as u8, b"");
            assert_eq!(reply_type, MsgType::Error);
            assert_eq!(reply, b"unknown message type");
        }
    }
}
