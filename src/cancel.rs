use tokio_util::sync::CancellationToken;

use crate::error::{IngestError, Result};

/// Cooperative cancellation shared between an ingest run and whoever wants
/// to stop it. Clones observe the same token.
#[derive(Debug, Clone)]
pub struct CancelToken(CancellationToken);

impl CancelToken {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Token to hand to async tasks that should stop with this run.
    pub fn token(&self) -> CancellationToken {
        self.0.clone()
    }

    /// Returns `Err(IngestError::Cancelled)` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(IngestError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl From<CancellationToken> for CancelToken {
    fn from(token: CancellationToken) -> Self {
        Self(token)
    }
}
