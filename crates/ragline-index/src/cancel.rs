use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::RagError;

/// Races external calls against a cancellation token and an optional deadline.
///
/// Clones share the token, so cancelling any clone (or the token the guard
/// was built from) stops every call in flight.
#[derive(Debug, Clone, Default)]
pub struct CallGuard {
    token: CancellationToken,
    timeout: Option<Duration>,
}

impl CallGuard {
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// # Errors
    ///
    /// Returns [`RagError::Cancelled`] if the token has fired.
    pub fn check(&self) -> Result<(), RagError> {
        if self.token.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless cancelled or past the deadline; the
    /// future is dropped in either case.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Cancelled`], [`RagError::Timeout`] naming `op`, or
    /// the error produced by `fut`.
    pub async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, RagError>
    where
        F: Future<Output = Result<T, RagError>>,
    {
        self.check()?;
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| RagError::Timeout(op))?,
                None => fut.await,
            }
        };
        tokio::select! {
            biased;
            () = self.token.cancelled() => {
                tracing::debug!(op, "call cancelled");
                Err(RagError::Cancelled)
            }
            result = bounded => result,
        }
    }
}
