mod health;
mod state;

pub use health::{ConnectionHealth, FailureType};
pub use state::ConnectionState;
