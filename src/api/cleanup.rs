//! Content cleanup contract for account deletion.
//!
//! Poems, collections, and social references live in a separate content
//! service. When an account is deleted, the core only requires that every
//! record referencing the user id is deleted or detached, idempotently.

use anyhow::Result;
use tracing::info;
use uuid::Uuid;

/// Cascading cleanup collaborator consulted before a user row is deleted.
pub trait ContentCleanup: Send + Sync {
    /// Delete or detach all records referencing this user id. Must be
    /// idempotent; a retried call after partial completion is safe.
    ///
    /// # Errors
    /// Returns an error if cleanup could not complete; the account
    /// deletion is then aborted before the user row is touched.
    fn purge_user(&self, user_id: Uuid) -> Result<()>;
}

/// Local dev implementation that logs the request and reports success.
#[derive(Clone, Debug)]
pub struct LogContentCleanup;

impl ContentCleanup for LogContentCleanup {
    fn purge_user(&self, user_id: Uuid) -> Result<()> {
        info!(%user_id, "content cleanup stub");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_cleanup_is_idempotent() {
        let id = Uuid::new_v4();
        assert!(LogContentCleanup.purge_user(id).is_ok());
        assert!(LogContentCleanup.purge_user(id).is_ok());
    }
}
