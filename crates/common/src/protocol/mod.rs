mod kind;
mod message;

pub use kind::MessageType;
pub use message::{DEFAULT_STATUS_CODE, TunnelMessage};
