//! Server half of the authenticated call wrapper.
//!
//! [`AuthenticatedHandler`] sits in front of any [`RpcHandler`] and checks
//! the call's credentials with [`verify_call`] first.  A rejected call never
//! reaches the inner handler.

use async_trait::async_trait;
use btremote_core::{verify_call, CallContext, CallError, Credential, RpcMethod, RpcReply};
use tracing::warn;

use crate::application::device_service::RpcHandler;

/// Wraps `inner` so that only calls carrying the configured secret reach it.
pub struct AuthenticatedHandler<H> {
    secret: Credential,
    inner: H,
}

impl<H: RpcHandler> AuthenticatedHandler<H> {
    pub fn new(secret: Credential, inner: H) -> Self {
        Self { secret, inner }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: RpcHandler> RpcHandler for AuthenticatedHandler<H> {
    async fn handle(&self, context: &CallContext, method: RpcMethod) -> Result<RpcReply, CallError> {
        if let Err(e) = verify_call(context, &self.secret) {
            warn!(
                method = method.name(),
                credentials = context.credentials().len(),
                "rejecting unauthorized call"
            );
            return Err(e);
        }
        self.inner.handle(context, method).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RpcHandler for CountingHandler {
        async fn handle(&self, _context: &CallContext, _method: RpcMethod) -> Result<RpcReply, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RpcReply::Done)
        }
    }

    fn wrapped() -> AuthenticatedHandler<CountingHandler> {
        AuthenticatedHandler::new(Credential::new("s3cret"), CountingHandler::default())
    }

    #[tokio::test]
    async fn test_correct_credential_reaches_handler_exactly_once() {
        // Arrange
        let handler = wrapped();
        let ctx = CallContext::with_credential(Credential::new("s3cret"));

        // Act
        let reply = handler.handle(&ctx, RpcMethod::ListTrustedDevices).await;

        // Assert
        assert_eq!(reply, Ok(RpcReply::Done));
        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_is_rejected_before_handler() {
        let handler = wrapped();
        let reply = handler
            .handle(&CallContext::new(), RpcMethod::ListTrustedDevices)
            .await;
        assert_eq!(reply, Err(CallError::Unauthorized));
        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_credential_is_rejected_before_handler() {
        let handler = wrapped();
        let ctx = CallContext::with_credential(Credential::new("guess"));
        let reply = handler
            .handle(
                &ctx,
                RpcMethod::Connect {
                    address: "AA:BB:CC:DD:EE:FF".to_string(),
                },
            )
            .await;
        assert_eq!(reply, Err(CallError::Unauthorized));
        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicated_credential_is_rejected_before_handler() {
        let handler = wrapped();
        let mut ctx = CallContext::with_credential(Credential::new("s3cret"));
        ctx.attach(Credential::new("s3cret"));
        let reply = handler.handle(&ctx, RpcMethod::ListTrustedDevices).await;
        assert_eq!(reply, Err(CallError::Unauthorized));
        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 0);
    }
}
