use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::token::Credential;

/// Opcodes for gateway messages.
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Gateway message envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(rename = "s", skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(rename = "t", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// HELLO payload data.
#[derive(Debug, Deserialize)]
pub struct HelloData {
    pub heartbeat_interval: u64,
}

/// The account resolved by a successful handshake (or a REST lookup).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: String,
}

impl AccountIdentity {
    pub fn tag(&self) -> String {
        if self.discriminator.is_empty() {
            self.username.clone()
        } else {
            format!("{}#{}", self.username, self.discriminator)
        }
    }
}

/// READY dispatch payload data.
#[derive(Debug, Deserialize)]
pub struct ReadyData {
    pub user: AccountIdentity,
}

pub fn heartbeat_frame() -> String {
    json!({ "op": opcode::HEARTBEAT, "d": null }).to_string()
}

pub fn identify_frame(credential: &Credential, intents: u64) -> String {
    json!({
        "op": opcode::IDENTIFY,
        "d": {
            "token": credential.expose(),
            "intents": intents,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "tokenfleet",
                "device": "tokenfleet"
            },
            "presence": {
                "status": "online",
                "afk": false
            }
        }
    })
    .to_string()
}
