use crate::transport::{Connection, Credentials, Delivery, Identity, LastMessage, Transport};
use anyhow::{Result, bail};
use std::sync::{Arc, Mutex};

/// Simulated transport driven by marker tokens in the recipient identifier:
///
///   `[bot]`            resolves as a bot
///   `[no-photo]`       resolves without a profile photo
///   `[unresolvable]`   identity resolution fails
///   `[flood:N]`        delivery is rate-limited with an N second wait
///   `[privacy]`        delivery rejected with a protocol error
///   `[drop]`           delivery fails outright
///   `[replied]`        the last message on record is inbound
///   `[reply-err]`      the reply probe itself fails
///
/// Everything else delivers successfully. Sent messages are recorded for
/// assertions.
#[derive(Clone)]
pub struct SimTransport {
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub account_id: String,
    pub recipient: String,
    pub text: String,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().expect("sent log poisoned").clone()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Connection>> {
        if credentials.session.contains("[expired]") {
            bail!("session expired for account {}", credentials.account_id);
        }
        Ok(Box::new(SimConnection {
            account_id: credentials.account_id.clone(),
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct SimConnection {
    account_id: String,
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl Connection for SimConnection {
    fn is_connected(&self) -> bool {
        true
    }

    fn resolve(&self, identifier: &str) -> Result<Identity> {
        if identifier.contains("[unresolvable]") {
            bail!("could not resolve {identifier}");
        }
        Ok(Identity {
            identifier: identifier.to_string(),
            is_bot: identifier.contains("[bot]"),
            has_photo: !identifier.contains("[no-photo]"),
        })
    }

    fn send(&self, recipient: &str, text: &str) -> Delivery {
        if let Some(wait_secs) = flood_wait(recipient) {
            return Delivery::RateLimited { wait_secs };
        }
        if recipient.contains("[privacy]") {
            return Delivery::Rejected {
                code: 403,
                message: "privacy restriction".to_string(),
            };
        }
        if recipient.contains("[drop]") {
            return Delivery::Failed {
                message: "connection reset".to_string(),
            };
        }
        self.sent
            .lock()
            .expect("sent log poisoned")
            .push(SentMessage {
                account_id: self.account_id.clone(),
                recipient: recipient.to_string(),
                text: text.to_string(),
            });
        Delivery::Sent
    }

    fn last_message(&self, recipient: &str) -> Result<Option<LastMessage>> {
        if recipient.contains("[reply-err]") {
            bail!("history unavailable for {recipient}");
        }
        if recipient.contains("[replied]") {
            return Ok(Some(LastMessage { inbound: true }));
        }
        Ok(None)
    }
}

fn flood_wait(recipient: &str) -> Option<u64> {
    let start = recipient.find("[flood:")?;
    let rest = &recipient[start + "[flood:".len()..];
    let end = rest.find(']')?;
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(transport: &SimTransport) -> Box<dyn Connection> {
        transport
            .connect(&Credentials {
                account_id: "acc-1".to_string(),
                api_id: "1".to_string(),
                api_hash: "h".to_string(),
                session: "s".to_string(),
                proxy_url: None,
            })
            .unwrap()
    }

    #[test]
    fn flood_marker_carries_wait_duration() {
        let transport = SimTransport::new();
        let conn = connection(&transport);
        match conn.send("alice[flood:42]", "hi") {
            Delivery::RateLimited { wait_secs } => assert_eq!(wait_secs, 42),
            other => panic!("unexpected delivery: {other:?}"),
        }
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn plain_recipient_is_recorded() {
        let transport = SimTransport::new();
        let conn = connection(&transport);
        assert!(matches!(conn.send("alice", "hi"), Delivery::Sent));
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "alice");
    }
}
