pub mod codec;
pub mod crc32;
pub mod datatypes;
pub mod dispatch;
pub mod routing;
pub mod selftest;
pub mod server;
pub mod telemetry;

// Re-export the wire-level types for direct access
pub use codec::{CodecError, Frame, FrameHeader, RxBuffer};
pub use datatypes::{MsgType, RouteEntry, RouteStrategy};
pub use dispatch::Dispatcher;
pub use routing::{RouteError, RouteTable};
pub use server::Server;

/// Error returned by most functions.
///
/// When writing a real application, one might want to consider a specialized
/// error handling crate or defining an error type as an `enum` of causes.
/// The hot paths (frame decode, route table operations) define their own
/// error enums so that expected runtime conditions such as a partial frame
/// on a socket never allocate; this boxed alias only appears at the binary
/// seam where the causes no longer matter.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for SentryFlow operations.
///
/// This is defined as a convenience.
pub type Result<T> = std::result::Result<T, Error>;
