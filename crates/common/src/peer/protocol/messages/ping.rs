use serde::{Deserialize, Serialize};

use super::Payload;

/// Liveness probe sent to every device of a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Free-form note echoed back in the [`Pong`]
    pub note: String,
}

impl Payload for Ping {
    const KIND: &'static str = "ping";
}

/// Answer to a [`Ping`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub note: String,
}

impl Payload for Pong {
    const KIND: &'static str = "pong";
}
