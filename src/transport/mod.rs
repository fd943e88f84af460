pub mod sim;

use anyhow::{Result, bail};

#[derive(Debug, Clone)]
pub struct Credentials {
    pub account_id: String,
    pub api_id: String,
    pub api_hash: String,
    pub session: String,
    pub proxy_url: Option<String>,
}

/// Resolved recipient identity with the profile attributes the filter
/// evaluator inspects.
#[derive(Debug, Clone)]
pub struct Identity {
    pub identifier: String,
    pub is_bot: bool,
    pub has_photo: bool,
}

/// The most recent message exchanged with a recipient. `inbound` means the
/// recipient wrote last, i.e. a reply.
#[derive(Debug, Clone)]
pub struct LastMessage {
    pub inbound: bool,
}

/// Result of one delivery attempt, with the transport's distinguished
/// failure shapes.
#[derive(Debug, Clone)]
pub enum Delivery {
    Sent,
    RateLimited { wait_secs: u64 },
    Rejected { code: i64, message: String },
    Failed { message: String },
}

pub trait Connection {
    fn is_connected(&self) -> bool;
    /// Best-effort identity resolution; callers treat errors as "no verdict".
    fn resolve(&self, identifier: &str) -> Result<Identity>;
    fn send(&self, recipient: &str, text: &str) -> Delivery;
    /// Best-effort reply probe; callers treat errors as "no reply detected".
    fn last_message(&self, recipient: &str) -> Result<Option<LastMessage>>;
}

pub trait Transport {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Connection>>;
}

pub fn provider_for(name: &str) -> Result<Box<dyn Transport>> {
    if name != "sim" {
        bail!("only `sim` transport supported in this version");
    }
    Ok(Box::new(sim::SimTransport::new()))
}
