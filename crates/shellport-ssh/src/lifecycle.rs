//! Session resource ownership
//!
//! NIST 800-53: AC-12 (Session Termination)
//! Implementation: A shell session owns its SSH connection and shell
//! channel; both are released exactly once, on every exit path.

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// A resource that must be released explicitly
#[async_trait]
pub trait Release: Send {
    async fn release(&mut self) -> Result<()>;
}

/// Owns the connection and shell of one interactive session
///
/// [`SessionLifecycle::release`] closes the shell, then the connection. If
/// the lifecycle is dropped before that (for example because the task
/// driving it was cancelled), the release is scheduled on the current
/// runtime instead.
pub struct SessionLifecycle<C, S>
where
    C: Release + 'static,
    S: Release + 'static,
{
    id: Uuid,
    connection: Option<C>,
    shell: Option<S>,
}

impl<C, S> SessionLifecycle<C, S>
where
    C: Release + 'static,
    S: Release + 'static,
{
    pub fn new(connection: C, shell: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection: Some(connection),
            shell: Some(shell),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn shell_mut(&mut self) -> Option<&mut S> {
        self.shell.as_mut()
    }

    pub fn is_released(&self) -> bool {
        self.connection.is_none() && self.shell.is_none()
    }

    /// Release the shell and then the connection
    ///
    /// Both are attempted even if the first fails; the first error is
    /// returned. Later calls do nothing.
    pub async fn release(&mut self) -> Result<()> {
        let shell = self.shell.take();
        let connection = self.connection.take();
        release_pair(self.id, shell, connection).await
    }
}

impl<C, S> Drop for SessionLifecycle<C, S>
where
    C: Release + 'static,
    S: Release + 'static,
{
    fn drop(&mut self) {
        if self.is_released() {
            return;
        }
        let id = self.id;
        let shell = self.shell.take();
        let connection = self.connection.take();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(session_id = %id, "Releasing dropped session");
                runtime.spawn(async move {
                    if let Err(e) = release_pair(id, shell, connection).await {
                        warn!(session_id = %id, error = %e, "Deferred session release failed");
                    }
                });
            }
            Err(_) => {
                warn!(session_id = %id, "Session dropped outside a runtime; resources not released");
            }
        }
    }
}

async fn release_pair<C: Release, S: Release>(
    id: Uuid,
    shell: Option<S>,
    connection: Option<C>,
) -> Result<()> {
    let mut first_error = None;

    if let Some(mut shell) = shell {
        if let Err(e) = shell.release().await {
            warn!(session_id = %id, error = %e, "Closing shell channel failed");
            first_error = Some(e);
        }
    }

    if let Some(mut connection) = connection {
        if let Err(e) = connection.release().await {
            warn!(session_id = %id, error = %e, "Closing SSH connection failed");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            debug!(session_id = %id, "Session resources released");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counted {
        releases: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Release for Counted {
        async fn release(&mut self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::ChannelClosed("already gone".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn counted(fail: bool) -> (Counted, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        (
            Counted {
                releases: Arc::clone(&releases),
                fail,
            },
            releases,
        )
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (connection, connection_releases) = counted(false);
        let (shell, shell_releases) = counted(false);
        let mut session = SessionLifecycle::new(connection, shell);

        session.release().await.unwrap();
        session.release().await.unwrap();
        drop(session);

        assert_eq!(connection_releases.load(Ordering::SeqCst), 1);
        assert_eq!(shell_releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shell_failure_still_closes_connection() {
        let (connection, connection_releases) = counted(false);
        let (shell, shell_releases) = counted(true);
        let mut session = SessionLifecycle::new(connection, shell);

        assert!(session.release().await.is_err());
        assert!(session.is_released());
        assert_eq!(connection_releases.load(Ordering::SeqCst), 1);
        assert_eq!(shell_releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_schedules_release() {
        let (connection, connection_releases) = counted(false);
        let (shell, shell_releases) = counted(false);
        drop(SessionLifecycle::new(connection, shell));

        for _ in 0..50 {
            if connection_releases.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(connection_releases.load(Ordering::SeqCst), 1);
        assert_eq!(shell_releases.load(Ordering::SeqCst), 1);
    }
}
