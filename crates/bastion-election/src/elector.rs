//! Bastion Leader Elector
//!
//! Runs the election state machine on one owning task:
//!
//! ```text
//! Follower -> Candidate -> Leader   lock acquired, callback(true)
//!                       -> Follower lock busy or error, callback(false)
//! Leader   -> Follower              check failed, callback(false)
//! ```
//!
//! A leader re-checks its lock every `check_interval`. Any failure, including
//! a dead session, drops the session and counts as losing leadership. Every
//! return to Follower waits `retry_interval` before the next attempt.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::lock::{AdvisoryLock, LockConnector, PgLockConnector};
use bastion_common::utils::advisory_lock_key;
use bastion_common::{BastionError, ElectionConfig, Result, StoreConfig};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// =============================================================================
// Role
// =============================================================================

/// Election role of this participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Role {
    #[default]
    Follower,
    /// Attempting to take the lock.
    Candidate,
    Leader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follower => "follower",
            Self::Candidate => "candidate",
            Self::Leader => "leader",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published state, written only by the election task.
struct ElectionState {
    leader: AtomicBool,
    role: watch::Sender<Role>,
}

impl ElectionState {
    fn new() -> Self {
        let (role, _) = watch::channel(Role::Follower);
        Self {
            leader: AtomicBool::new(false),
            role,
        }
    }

    fn set(&self, role: Role) {
        self.leader.store(role == Role::Leader, Ordering::SeqCst);
        self.role.send_replace(role);
    }

    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Leader Elector
// =============================================================================

/// Advisory-lock leader election.
pub struct LeaderElector<C: LockConnector> {
    config: ElectionConfig,
    connector: C,
    key: i64,
}

impl LeaderElector<PgLockConnector> {
    /// Elector over dedicated sessions to the configured database.
    pub fn postgres(store: &StoreConfig, config: ElectionConfig) -> Result<Self> {
        Self::new(config, PgLockConnector::new(store)?)
    }
}

impl<C: LockConnector> LeaderElector<C> {
    pub fn new(config: ElectionConfig, connector: C) -> Result<Self> {
        config.validate()?;
        let key = advisory_lock_key(&config.lock_name);
        Ok(Self {
            config,
            connector,
            key,
        })
    }

    /// The advisory lock key all participants compete for.
    pub fn key(&self) -> i64 {
        self.key
    }

    /// Start electing on a background task.
    ///
    /// `on_change` runs on the election task once per election outcome and
    /// once per loss. The next check never starts before it returns.
    pub fn start<F>(self, on_change: F) -> ElectorHandle
    where
        F: FnMut(bool) + Send + 'static,
    {
        let state = Arc::new(ElectionState::new());
        let (shutdown, stopped) = watch::channel(false);
        let task = tokio::spawn(self.run(on_change, Arc::clone(&state), stopped));
        ElectorHandle {
            state,
            shutdown,
            task: Some(task),
        }
    }

    async fn run<F>(self, mut on_change: F, state: Arc<ElectionState>, mut stopped: watch::Receiver<bool>)
    where
        F: FnMut(bool) + Send,
    {
        tracing::info!(lock = %self.config.lock_name, key = self.key, "Starting leader election");
        let mut session: Option<C::Lock> = None;

        tokio::select! {
            _ = self.elect(&mut on_change, &state, &mut session) => {}
            _ = stopped.changed() => {}
        }

        let was_leader = state.is_leader();
        if was_leader {
            if let Some(lock) = session.as_mut() {
                if let Err(e) = self.bounded(lock.release(self.key)).await {
                    tracing::warn!(lock = %self.config.lock_name, error = %e, "Failed to release leadership lock");
                }
            }
        }
        state.set(Role::Follower);
        if was_leader {
            on_change(false);
        }
        tracing::info!(lock = %self.config.lock_name, "Stopped leader election");
    }

    async fn elect<F>(&self, on_change: &mut F, state: &ElectionState, session: &mut Option<C::Lock>)
    where
        F: FnMut(bool) + Send,
    {
        loop {
            state.set(Role::Candidate);
            if self.campaign(session).await {
                state.set(Role::Leader);
                tracing::info!(lock = %self.config.lock_name, "Acquired leadership");
                on_change(true);

                let reason = self.hold(session).await;
                *session = None;
                tracing::warn!(lock = %self.config.lock_name, reason = %reason, "Lost leadership");
            }
            state.set(Role::Follower);
            on_change(false);
            tokio::time::sleep(self.config.retry_interval).await;
        }
    }

    /// One acquisition attempt, dialing a session first when there is none.
    async fn campaign(&self, session: &mut Option<C::Lock>) -> bool {
        if session.is_none() {
            match self.bounded(self.connector.connect()).await {
                Ok(lock) => *session = Some(lock),
                Err(e) => {
                    tracing::warn!(lock = %self.config.lock_name, error = %e, "Election session unavailable");
                    return false;
                }
            }
        }
        let Some(lock) = session.as_mut() else {
            return false;
        };

        let attempt = self.bounded(lock.try_lock(self.key)).await;
        match attempt {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(lock = %self.config.lock_name, "Leadership held elsewhere");
                false
            }
            Err(e) => {
                tracing::warn!(lock = %self.config.lock_name, error = %e, "Leader election failed");
                *session = None;
                false
            }
        }
    }

    /// Re-check the lock until it is gone. Returns why leadership ended.
    async fn hold(&self, session: &mut Option<C::Lock>) -> BastionError {
        loop {
            tokio::time::sleep(self.config.check_interval).await;
            let Some(lock) = session.as_mut() else {
                return BastionError::LeadershipLost("no election session".to_string());
            };
            match self.bounded(lock.is_held(self.key)).await {
                Ok(true) => {}
                Ok(false) => {
                    return BastionError::LeadershipLost(format!(
                        "lock {} is no longer held by this session",
                        self.config.lock_name
                    ))
                }
                Err(e) => return e,
            }
        }
    }

    async fn bounded<T, Fut>(&self, work: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.check_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(BastionError::Timeout(format!(
                "election round trip exceeded {:?}",
                self.config.check_timeout
            ))),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Observes and stops a running election. Dropping it aborts the task, which
/// ends the session and frees the lock.
pub struct ElectorHandle {
    state: Arc<ElectionState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ElectorHandle {
    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    pub fn role(&self) -> Role {
        *self.state.role.borrow()
    }

    /// Receiver that sees every role change.
    pub fn subscribe(&self) -> watch::Receiver<Role> {
        self.state.role.subscribe()
    }

    /// Release the lock if held and wait for the election task to finish.
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown.send_replace(true);
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| BastionError::Internal(format!("election task failed: {}", e))),
            None => Ok(()),
        }
    }
}

impl Drop for ElectorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ElectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectorHandle")
            .field("role", &self.role())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
