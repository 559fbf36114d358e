use log::{debug, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::pool::SessionPool;
use super::{FailureKind, Session, SessionFailure, SessionProvider, SessionState};
use crate::config::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_POOL_IDLE,
    DEFAULT_PREPARE_TIMEOUT,
};
use crate::error::ConnectError;
use crate::registry::DeviceProfile;

/// Boxed future returned by a `with_session` operation.
pub type SessionFuture<'s, T> = Pin<Box<dyn Future<Output = Result<T, ConnectError>> + Send + 's>>;

/// Deadlines applied by the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Connect plus authentication.
    pub connect: Duration,
    /// From authentication to a usable prompt. Expiry is a transport fault.
    pub prepare: Duration,
    /// One command, or one whole configuration set.
    pub command: Duration,
    /// Graceful close before falling back to a forced close.
    pub close: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            prepare: DEFAULT_PREPARE_TIMEOUT,
            command: DEFAULT_COMMAND_TIMEOUT,
            close: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Opens, lends out and releases device sessions.
///
/// Without pooling every acquisition opens a fresh session and every release
/// closes it. With pooling, healthy sessions are parked per device and
/// revalidated before reuse.
pub struct SessionManager<P: SessionProvider> {
    provider: Arc<P>,
    timeouts: SessionTimeouts,
    pool: Option<SessionPool<P>>,
    next_id: AtomicU64,
}

impl<P: SessionProvider> SessionManager<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            timeouts: SessionTimeouts::default(),
            pool: None,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Enables idle pooling. Parked sessions are closed after `idle_timeout`.
    pub fn with_pooling(mut self, idle_timeout: Duration) -> Self {
        self.pool = Some(SessionPool::new(Arc::clone(&self.provider), idle_timeout));
        self
    }

    /// Pooling with the default idle timeout.
    pub fn pooled(self) -> Self {
        self.with_pooling(DEFAULT_POOL_IDLE)
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        self.timeouts
    }

    pub fn is_pooling(&self) -> bool {
        self.pool.is_some()
    }

    /// Returns a Ready session for `profile`, reusing a parked one when possible.
    pub async fn acquire(&self, profile: &DeviceProfile) -> Result<Session<P>, SessionFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Some(pool) = &self.pool
            && let Some(mut handle) = pool.checkout(&profile.fingerprint()).await
        {
            if self.provider.is_alive(&mut handle).await {
                debug!("Session {id} reusing pooled session for {}", profile.name());
                return Ok(self.session(id, profile, handle));
            }
            debug!("Pooled session for {} is stale, reconnecting", profile.name());
            self.close_handle(&mut handle, true).await;
        }

        debug!(
            "Session {id} connecting to {} ({})",
            profile.name(),
            profile.endpoint()
        );
        let opened = tokio::time::timeout(self.timeouts.connect, self.provider.open(profile)).await;
        let handle = match opened {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                let failure = SessionFailure::from_open_fault(&err);
                debug!("Session {id} open failed for {}: {failure}", profile.name());
                return Err(failure);
            }
            Err(_) => {
                debug!("Session {id} open timed out for {}", profile.name());
                return Err(SessionFailure::new(
                    FailureKind::ConnectFailed,
                    format!(
                        "no session to {} within {} ms",
                        profile.endpoint(),
                        self.timeouts.connect.as_millis()
                    ),
                ));
            }
        };

        // From here on the session owns the handle, so cancellation closes it.
        let mut session = self.session(id, profile, handle);
        if let Err(err) = session.prepare(profile, self.timeouts.prepare).await {
            let failure = SessionFailure::from_session_fault(&err);
            debug!("Session {id} preparation failed for {}: {failure}", profile.name());
            self.release(session).await;
            return Err(failure);
        }
        debug!("Session {id} ready for {}", profile.name());
        Ok(session)
    }

    /// Hands a session back. Healthy sessions may be parked; everything else is closed.
    pub async fn release(&self, mut session: Session<P>) {
        let Some(mut handle) = session.take_handle() else {
            return;
        };
        let failed = session.state() == SessionState::Failed;

        if !failed && let Some(pool) = &self.pool {
            match pool.checkin(session.fingerprint().to_string(), handle).await {
                None => {
                    session.set_state(SessionState::Closed);
                    return;
                }
                Some(returned) => handle = returned,
            }
        }

        debug!(
            "Session {} closing ({:?}) for {}",
            session.id(),
            session.state(),
            session.device()
        );
        self.close_handle(&mut handle, failed).await;
        session.set_state(SessionState::Closed);
    }

    /// Runs `op` against a session for `profile` and always releases it.
    ///
    /// Connect and authentication faults, and faults raised by `op`, come
    /// back as [`SessionFailure`]. The session is released before this
    /// returns, whatever `op` did.
    pub async fn with_session<T, F>(
        &self,
        profile: &DeviceProfile,
        op: F,
    ) -> Result<T, SessionFailure>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut Session<P>) -> SessionFuture<'s, T> + Send,
    {
        let mut session = self.acquire(profile).await?;
        let outcome = op(&mut session).await;
        self.release(session).await;
        outcome.map_err(|err| SessionFailure::from_session_fault(&err))
    }

    /// Closes every parked session.
    pub async fn shutdown(&self) {
        let Some(pool) = &self.pool else {
            return;
        };
        let handles = pool.drain().await;
        debug!("Closing {} pooled sessions", handles.len());
        for mut handle in handles {
            self.close_handle(&mut handle, false).await;
        }
    }

    fn session(&self, id: u64, profile: &DeviceProfile, handle: P::Handle) -> Session<P> {
        Session::ready(
            id,
            profile,
            handle,
            Arc::clone(&self.provider),
            self.timeouts.command,
        )
    }

    async fn close_handle(&self, handle: &mut P::Handle, force: bool) {
        if force {
            self.provider.abort(handle).await;
        }
        let closed = tokio::time::timeout(self.timeouts.close, self.provider.close(handle)).await;
        if closed.is_err() {
            warn!(
                "Graceful close exceeded {} ms, forcing",
                self.timeouts.close.as_millis()
            );
            self.provider.abort(handle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeviceEntry, DeviceRegistry, Secret};
    use crate::session::{DeviceScript, OpenBehavior, ScriptedProvider};

    fn registry() -> DeviceRegistry {
        let entry = |address: &str| DeviceEntry {
            address: Some(address.to_string()),
            username: Some("admin".to_string()),
            password: Some(Secret::new("cisco")),
            ..DeviceEntry::default()
        };
        DeviceRegistry::from_entries(vec![
            ("r1", entry("10.0.0.1")),
            ("r2", entry("10.0.0.2")),
            ("r3", entry("10.0.0.3")),
            ("r4", entry("10.0.0.4")),
        ])
        .expect("registry")
    }

    fn provider() -> Arc<ScriptedProvider> {
        let mut ok = DeviceScript::default();
        ok.outputs
            .insert("show clock".to_string(), "12:00:00 UTC".to_string());
        let refused = DeviceScript {
            open: OpenBehavior::RejectAuth {
                message: "bad password".to_string(),
            },
            ..DeviceScript::default()
        };
        let hanging = DeviceScript {
            open: OpenBehavior::Hang,
            ..DeviceScript::default()
        };
        Arc::new(
            ScriptedProvider::new()
                .with_script("10.0.0.1", ok)
                .with_script("10.0.0.2", refused)
                .with_script("10.0.0.3", hanging)
                .with_script(
                    "10.0.0.4",
                    DeviceScript {
                        open: OpenBehavior::RejectEnable {
                            message: "% Bad secrets".to_string(),
                        },
                        ..DeviceScript::default()
                    },
                ),
        )
    }

    #[tokio::test]
    async fn with_session_releases_after_success_and_failure() {
        let registry = registry();
        let provider = provider();
        let manager = SessionManager::new(Arc::clone(&provider));
        let r1 = registry.lookup("r1").expect("r1");

        let clock = manager
            .with_session(r1, |session| {
                Box::pin(async move { session.run_command("show clock").await })
            })
            .await
            .expect("clock");
        assert_eq!(clock, "12:00:00 UTC");

        let failed = manager
            .with_session(r1, |session| {
                Box::pin(async move { session.run_command("show bogus").await })
            })
            .await;
        assert!(matches!(failed, Err(SessionFailure { kind: FailureKind::Transport, .. })));

        let stats = provider.stats();
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.closed, 2);
    }

    #[tokio::test]
    async fn auth_rejection_is_reported_without_a_session() {
        let registry = registry();
        let provider = provider();
        let manager = SessionManager::new(Arc::clone(&provider));

        let err = manager
            .acquire(registry.lookup("r2").expect("r2"))
            .await
            .err()
            .expect("auth failure");
        assert_eq!(err.kind, FailureKind::AuthFailed);
        assert_eq!(provider.stats().closed, 0);
    }

    #[tokio::test]
    async fn connect_deadline_maps_to_connect_failed() {
        let registry = registry();
        let manager = SessionManager::new(provider()).with_timeouts(SessionTimeouts {
            connect: Duration::from_millis(50),
            ..SessionTimeouts::default()
        });

        let err = manager
            .acquire(registry.lookup("r3").expect("r3"))
            .await
            .err()
            .expect("timeout");
        assert_eq!(err.kind, FailureKind::ConnectFailed);
        assert!(err.message.contains("50 ms"));
    }

    #[tokio::test]
    async fn enable_rejection_is_a_transport_failure_and_closes_the_session() {
        let registry = registry();
        let provider = provider();
        let manager = SessionManager::new(Arc::clone(&provider));

        let err = manager
            .acquire(registry.lookup("r4").expect("r4"))
            .await
            .err()
            .expect("enable failure");
        assert_eq!(err.kind, FailureKind::Transport);
        assert!(err.message.contains("Bad secrets"));

        let stats = provider.stats();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.aborted, 1);
        assert_eq!(stats.closed, 1);
    }

    #[tokio::test]
    async fn pooled_sessions_are_reused_and_closed_on_shutdown() {
        let registry = registry();
        let provider = provider();
        let manager = SessionManager::new(Arc::clone(&provider)).pooled();
        let r1 = registry.lookup("r1").expect("r1");

        for _ in 0..3 {
            let session = manager.acquire(r1).await.expect("session");
            manager.release(session).await;
        }
        assert_eq!(provider.stats().opened, 1);
        assert_eq!(provider.stats().closed, 0);

        manager.shutdown().await;
        assert_eq!(provider.stats().closed, 1);
    }

    #[tokio::test]
    async fn failed_session_is_not_pooled() {
        let registry = registry();
        let provider = provider();
        let manager = SessionManager::new(Arc::clone(&provider)).pooled();
        let r1 = registry.lookup("r1").expect("r1");

        let mut session = manager.acquire(r1).await.expect("session");
        session.set_state(SessionState::Failed);
        manager.release(session).await;

        let stats = provider.stats();
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.aborted, 1);

        manager.acquire(r1).await.expect("fresh session");
        assert_eq!(provider.stats().opened, 2);
    }
}
