//! Per-request context threaded through every store call.

use std::time::{Duration, Instant};

use ruler_access::Principal;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RulerError};

/// The principal, cancellation token and deadline of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    principal: Principal,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Creates a context for the principal with no deadline.
    #[must_use]
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets a deadline relative to now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Returns the principal.
    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Returns the organization the principal is signed in to.
    #[must_use]
    pub fn org_id(&self) -> i64 {
        self.principal.org_id
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true if the request was cancelled or its deadline passed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancellation.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fails with [`RulerError::Cancelled`] once the request is done.
    ///
    /// # Errors
    ///
    /// Returns `RulerError::Cancelled` if the request was cancelled or timed out.
    pub fn check(&self) -> Result<()> {
        if self.is_done() {
            return Err(RulerError::Cancelled);
        }
        Ok(())
    }
}
