use std::collections::BTreeMap;

use super::signer::{GatewaySigner, SignedMessage};

/// Outcome of checking an inbound gateway call. `params` never contains the
/// signature fields, whether or not verification passed.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedCallback {
    pub verified: bool,
    pub params: BTreeMap<String, String>,
}

/// Pure predicate over inbound parameters; holds no state and touches no store.
#[derive(Debug, Clone)]
pub struct CallbackVerifier {
    signer: GatewaySigner,
}

impl CallbackVerifier {
    pub fn new(signer: GatewaySigner) -> Self {
        Self { signer }
    }

    pub fn signer(&self) -> &GatewaySigner {
        &self.signer
    }

    pub fn verify(&self, raw: BTreeMap<String, String>) -> VerifiedCallback {
        let mut claimed = None;
        let mut params = BTreeMap::new();
        for (key, value) in raw {
            if key == self.signer.signature_field() {
                claimed = Some(value);
            } else if !self.signer.is_signature_field(&key) {
                params.insert(key, value);
            }
        }

        let verified = match claimed.as_deref().map(str::trim) {
            Some(claimed) if !claimed.is_empty() => {
                self.signer
                    .verify(&params, SignedMessage::Notification, claimed)
            }
            _ => false,
        };

        VerifiedCallback { verified, params }
    }
}
