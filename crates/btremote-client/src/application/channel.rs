//! Client half of the authenticated call wrapper.
//!
//! [`AuthenticatedChannel`] attaches the configured credential to every
//! outbound call and hands it to a [`CallTransport`].  It holds no other
//! state, so cloning it is cheap and every clone talks to the same
//! transport.

use std::sync::Arc;

use async_trait::async_trait;
use btremote_core::{CallContext, CallError, Credential, RpcMethod, RpcReply};

/// Carries one call to a peer and returns its result.
///
/// Implemented by the TCP transport in production and by recording doubles
/// in tests.
#[async_trait]
pub trait CallTransport: Send + Sync {
    async fn call(&self, context: CallContext, method: RpcMethod) -> Result<RpcReply, CallError>;

    /// Releases any open connection.  Later calls may open a new one.
    async fn close(&self) {}
}

/// Outbound call channel that always carries exactly one credential.
#[derive(Clone)]
pub struct AuthenticatedChannel {
    credential: Credential,
    transport: Arc<dyn CallTransport>,
}

impl AuthenticatedChannel {
    pub fn new(credential: Credential, transport: Arc<dyn CallTransport>) -> Self {
        Self {
            credential,
            transport,
        }
    }

    pub async fn call(&self, method: RpcMethod) -> Result<RpcReply, CallError> {
        let context = CallContext::with_credential(self.credential.clone());
        self.transport.call(context, method).await
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        contexts: Mutex<Vec<CallContext>>,
    }

    #[async_trait]
    impl CallTransport for RecordingTransport {
        async fn call(&self, context: CallContext, _method: RpcMethod) -> Result<RpcReply, CallError> {
            self.contexts.lock().unwrap().push(context);
            Ok(RpcReply::Done)
        }
    }

    #[tokio::test]
    async fn test_every_call_carries_exactly_one_credential() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let channel = AuthenticatedChannel::new(Credential::new("s3cret"), transport.clone());

        // Act
        channel.call(RpcMethod::ListTrustedDevices).await.unwrap();
        channel
            .call(RpcMethod::Disconnect {
                address: "AA:BB:CC:DD:EE:FF".to_string(),
            })
            .await
            .unwrap();

        // Assert
        let contexts = transport.contexts.lock().unwrap();
        assert_eq!(contexts.len(), 2);
        for ctx in contexts.iter() {
            assert_eq!(ctx.credentials(), &[Credential::new("s3cret")]);
        }
    }
}
