//! Wire-level vocabulary shared by the codec, dispatcher and server.

mod msg_type;
mod route;

pub use msg_type::{FLAG_ACK_REQUIRED, MsgType};
pub use route::{RouteDecision, RouteEntry, RouteStrategy};
