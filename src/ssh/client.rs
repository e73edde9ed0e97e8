use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh_keys::key::PublicKey;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::config::HostKeyPolicy;
use crate::error::{ToolError, ToolErrorKind};

/// Implements the host-key verification policy from §4.1. `strict` requires
/// a pre-seeded entry in `known_keys`; `trust-on-first-use` accepts the
/// first key seen per host and remembers it; `accept-all` never rejects.
#[derive(Clone)]
pub struct AdminHandler {
    pub policy: HostKeyPolicy,
    pub host_label: String,
    known_keys: Arc<Mutex<HashSet<String>>>,
}

impl AdminHandler {
    pub fn new(policy: HostKeyPolicy, host_label: String, known_keys: Arc<Mutex<HashSet<String>>>) -> Self {
        Self {
            policy,
            host_label,
            known_keys,
        }
    }
}

#[async_trait]
impl Handler for AdminHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        use russh_keys::PublicKeyBase64;
        let fingerprint = server_public_key.public_key_base64();
        match self.policy {
            HostKeyPolicy::AcceptAll => Ok(true),
            HostKeyPolicy::TrustOnFirstUse => {
                let mut known = self.known_keys.lock().expect("known_keys poisoned");
                let key = format!("{}:{}", self.host_label, fingerprint);
                if known.contains(&key) {
                    Ok(true)
                } else {
                    known.insert(key);
                    Ok(true)
                }
            }
            HostKeyPolicy::Strict => {
                let known = self.known_keys.lock().expect("known_keys poisoned");
                let key = format!("{}:{}", self.host_label, fingerprint);
                Ok(known.contains(&key))
            }
        }
    }
}

pub fn auth_failed_for_host_key(host: &str) -> ToolError {
    ToolError::new(
        ToolErrorKind::AuthFailed,
        format!("host key rejected for {host}"),
    )
    .with_details(serde_json::json!({"sub_reason": "host_key_rejected"}))
}

pub type AdminHandle = Handle<AdminHandler>;
