//! Shared-secret credentials for the device RPC channel.
//!
//! Every outbound call carries a [`CallContext`] with the caller's
//! [`Credential`] attached.  Every inbound call is checked by [`verify_call`]
//! before any handler runs: the context must hold exactly one credential and
//! it must equal the configured secret.
//!
//! The context holds a list of credentials.  Zero, several, and a wrong one
//! are all rejected the same way.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::rpc::CallError;

/// A shared secret proving the caller may invoke remote operations.
///
/// `Debug` output is redacted so secrets never end up in log lines.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Returns the secret text.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Out-of-band attributes travelling with one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    credentials: Vec<Credential>,
}

impl CallContext {
    /// A context with no credentials attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context carrying exactly `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credentials: vec![credential],
        }
    }

    /// Attaches one more credential.
    pub fn attach(&mut self, credential: Credential) {
        self.credentials.push(credential);
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    /// Returns the credential when exactly one is attached.
    pub fn single_credential(&self) -> Option<&Credential> {
        match self.credentials.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// Checks an inbound call against the configured secret.
///
/// # Errors
///
/// Returns [`CallError::Unauthorized`] when the context holds zero or more
/// than one credential, or when the single credential differs from `expected`.
pub fn verify_call(context: &CallContext, expected: &Credential) -> Result<(), CallError> {
    match context.single_credential() {
        Some(presented) if presented == expected => Ok(()),
        _ => Err(CallError::Unauthorized),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
