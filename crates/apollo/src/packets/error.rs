use apollo_protocol::PacketKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warn,
    Info,
}

/// A failure shown to the client. Sent by the server only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPacket {
    pub severity: Severity,
    pub msg: String,
}

impl ErrorPacket {
    pub fn new(severity: Severity, msg: impl Into<String>) -> Self {
        Self {
            severity,
            msg: msg.into(),
        }
    }
}

impl PacketKind for ErrorPacket {
    const NAME: &'static str = "error";
}
