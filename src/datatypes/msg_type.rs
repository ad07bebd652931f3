// ABOUTME: Defines the SentryFlow command codes carried in the frame type byte
// ABOUTME: Implements type-code validation and human-readable names for logging

use num_enum::TryFromPrimitive;

/// Advisory request flag; the dispatcher replies to every request whether or
/// not it is set.
pub const FLAG_ACK_REQUIRED: u16 = 1 << 0;

/// SentryFlow command codes.
///
/// The `type` field of the frame header identifies the operation. Requests
/// use odd codes, their replies the next even code, except for `Error`
/// which answers any request the dispatcher does not recognize.
///
/// Codes outside this enum are not a framing error: the frame still decodes
/// and the dispatcher answers it with an [`MsgType::Error`] reply, so the
/// header keeps the raw byte and conversion happens at dispatch time.
#[derive(TryFromPrimitive)]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// Liveness probe; payload is echoed back.
    Ping = 1,
    /// Reply to `Ping`.
    Pong = 2,
    /// Echo request; payload is echoed back.
    Echo = 3,
    /// Reply to `Echo`.
    EchoReply = 4,
    /// Request the telemetry counters.
    GetStats = 5,
    /// Reply to `GetStats`; fixed 40-byte counter block.
    StatsReply = 6,
    /// Batch of 16-byte route records to upsert.
    RouteUpdate = 7,
    /// Reply to `RouteUpdate`; number of records applied.
    RouteAck = 8,
    /// Longest-prefix-match query for one IPv4 address.
    RouteLookup = 9,
    /// Reply to `RouteLookup`.
    RouteReply = 10,
    /// Error reply carrying a short UTF-8 message.
    Error = 255,
}

impl MsgType {
    /// Human-readable name of a raw type byte, for diagnostics.
    pub fn name(raw: u8) -> &'static str {
        match MsgType::try_from(raw) {
            Ok(MsgType::Ping) => "PING",
            Ok(MsgType::Pong) => "PONG",
            Ok(MsgType::Echo) => "ECHO",
            Ok(MsgType::EchoReply) => "ECHO_REPLY",
            Ok(MsgType::GetStats) => "GET_STATS",
            Ok(MsgType::StatsReply) => "STATS_REPLY",
            Ok(MsgType::RouteUpdate) => "ROUTE_UPDATE",
            Ok(MsgType::RouteAck) => "ROUTE_ACK",
            Ok(MsgType::RouteLookup) => "ROUTE_LOOKUP",
            Ok(MsgType::RouteReply) => "ROUTE_REPLY",
            Ok(MsgType::Error) => "ERROR",
            Err(_) => "UNKNOWN",
        }
    }
}
