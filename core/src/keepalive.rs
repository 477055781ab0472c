//! TCP keep-alive supervision
//!
//! The launch server helper has no exit channel we can rely on once it runs
//! elevated, so its liveness is judged by periodically connecting to its port.
//! [`KeepAliveTracker`] is the pure state machine; [`KeepAliveSupervisor`] drives
//! it on a tokio interval and kills the helper once the retry budget is spent.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::KeepAliveConfig;
use crate::process::KillHandle;

/// Probe schedule and retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlivePolicy {
    pub interval: Duration,
    pub probe_timeout: Duration,
    /// Consecutive failures (after the first success) that abandon the helper
    pub retry_budget: u32,
}

impl Default for KeepAlivePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(300),
            retry_budget: 10,
        }
    }
}

impl From<&KeepAliveConfig> for KeepAlivePolicy {
    fn from(config: &KeepAliveConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms.max(1)),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            retry_budget: config.retry_budget.max(1),
        }
    }
}

/// Keep-alive state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeepAliveState {
    /// No probe has succeeded yet; failures are not counted
    #[default]
    WaitingFirstConnect,
    /// Last probe succeeded
    Healthy,
    /// Consecutive failures since the last success
    Degraded { failures: u32 },
    /// Budget exhausted; terminal
    Abandoned,
}

impl KeepAliveState {
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }
}

/// Consecutive-failure bookkeeping.
#[derive(Debug, Clone)]
pub struct KeepAliveTracker {
    retry_budget: u32,
    state: KeepAliveState,
}

impl KeepAliveTracker {
    pub fn new(retry_budget: u32) -> Self {
        Self {
            retry_budget,
            state: KeepAliveState::WaitingFirstConnect,
        }
    }

    pub fn state(&self) -> KeepAliveState {
        self.state
    }

    /// Whether the endpoint ever answered.
    pub fn confirmed(&self) -> bool {
        !matches!(self.state, KeepAliveState::WaitingFirstConnect)
    }

    pub fn record_success(&mut self) -> KeepAliveState {
        if !self.state.is_abandoned() {
            self.state = KeepAliveState::Healthy;
        }
        self.state
    }

    pub fn record_failure(&mut self) -> KeepAliveState {
        self.state = match self.state {
            KeepAliveState::WaitingFirstConnect => KeepAliveState::WaitingFirstConnect,
            KeepAliveState::Abandoned => KeepAliveState::Abandoned,
            KeepAliveState::Healthy => self.degraded(1),
            KeepAliveState::Degraded { failures } => self.degraded(failures + 1),
        };
        self.state
    }

    fn degraded(&self, failures: u32) -> KeepAliveState {
        if failures >= self.retry_budget {
            KeepAliveState::Abandoned
        } else {
            KeepAliveState::Degraded { failures }
        }
    }
}

/// One liveness check.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> io::Result<()>;
}

/// Connects to a TCP endpoint and drops the connection.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self) -> io::Result<()> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no answer from {} within {:?}", self.addr, self.timeout),
            )),
        }
    }
}

/// Periodic probe task bound to one helper process.
///
/// Once abandoned the supervisor is inert; start a new one for a new helper.
#[derive(Debug)]
pub struct KeepAliveSupervisor {
    state: watch::Receiver<KeepAliveState>,
    cancel: CancellationToken,
}

impl KeepAliveSupervisor {
    /// Spawn the probe loop. Must be called from within a tokio runtime.
    pub fn start<P>(probe: P, policy: KeepAlivePolicy, kill: KillHandle) -> Self
    where
        P: Probe + 'static,
    {
        let (state_tx, state_rx) = watch::channel(KeepAliveState::WaitingFirstConnect);
        let cancel = CancellationToken::new();

        tokio::spawn(run(Arc::new(probe), policy, kill, state_tx, cancel.clone()));

        Self {
            state: state_rx,
            cancel,
        }
    }

    pub fn state(&self) -> KeepAliveState {
        *self.state.borrow()
    }

    /// Still probing and not abandoned.
    pub fn is_within_budget(&self) -> bool {
        !self.cancel.is_cancelled() && !self.state().is_abandoned()
    }

    /// Stop probing without touching the process.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the loop has stopped (abandoned or stopped).
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }
}

impl Drop for KeepAliveSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    probe: Arc<dyn Probe>,
    policy: KeepAlivePolicy,
    kill: KillHandle,
    state_tx: watch::Sender<KeepAliveState>,
    cancel: CancellationToken,
) {
    let mut tracker = KeepAliveTracker::new(policy.retry_budget);
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = probe.probe() => result,
        };

        let state = match result {
            Ok(()) => tracker.record_success(),
            Err(e) => {
                let state = tracker.record_failure();
                if tracker.confirmed() {
                    tracing::debug!(?state, "Keep-alive probe failed: {}", e);
                }
                state
            }
        };
        state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });

        if state.is_abandoned() {
            tracing::warn!(
                budget = policy.retry_budget,
                "Keep-alive budget exhausted, killing launch server"
            );
            kill.kill();
            cancel.cancel();
            break;
        }
    }

    tracing::debug!("Keep-alive supervisor stopped");
}
