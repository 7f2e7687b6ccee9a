//! Reconnection mechanism implementation
//!
//! Per-device exponential backoff with jitter. The helper never sleeps: the
//! supervisor asks [`ReconnectHelper::is_due`] on every scan, so one slow
//! device does not hold back the others.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::config::ReconnectConfig;
use crate::error::PnioError;

/// Reconnection error types
#[derive(Error, Debug)]
pub enum ReconnectError {
    /// Maximum retry attempts exceeded
    #[error("Maximum reconnection attempts exceeded")]
    MaxAttemptsExceeded,

    /// Backoff delay has not elapsed yet
    #[error("Next attempt not due yet")]
    NotDue,

    /// Another device holds the CONNECTING slot; not counted as an attempt
    #[error("busy: {0}")]
    Busy(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Reconnection state as seen by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// Successfully connected
    Connected,
    /// Disconnected, eligible once the backoff delay elapsed
    Disconnected,
    /// Attempt in progress
    Reconnecting,
    /// Reconnection failed (max attempts reached)
    Failed,
}

/// Reconnection policy configuration
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum retry attempts (0 means unlimited)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Backoff multiplier for exponential delay
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Create from configuration values
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter: true,
        }
    }
}

/// Reconnection statistics tracking
#[derive(Debug, Default, Clone)]
pub struct ReconnectStats {
    /// Total reconnection attempts
    pub total_attempts: u64,
    /// Successful reconnection count
    pub successful_reconnects: u64,
    /// Failed reconnection count
    pub failed_reconnects: u64,
    /// Attempts turned away because another device was connecting
    pub busy_rejections: u64,
    /// Last successful connection time
    pub last_connected: Option<Instant>,
}

/// Backoff bookkeeping for one device
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    current_attempt: u32,
    next_attempt: Option<Instant>,
    state: ReconnectState,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    /// Create a new reconnection helper
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current_attempt: 0,
            next_attempt: None,
            state: ReconnectState::Disconnected,
            stats: ReconnectStats::default(),
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Whether this helper ever started an attempt or saw the device connected
    pub fn has_history(&self) -> bool {
        self.stats.total_attempts > 0 || self.stats.last_connected.is_some()
    }

    /// Mark the connection as successful
    pub fn mark_connected(&mut self) {
        self.state = ReconnectState::Connected;
        self.current_attempt = 0;
        self.next_attempt = None;
        self.stats.last_connected = Some(Instant::now());
        debug!("Connection marked as successful");
    }

    /// Mark the connection as lost; the next attempt is due immediately
    pub fn mark_disconnected(&mut self) {
        self.state = ReconnectState::Disconnected;
        self.current_attempt = 0;
        self.next_attempt = None;
        debug!("Connection marked as disconnected");
    }

    /// Calculate the next retry delay with exponential backoff
    pub fn calculate_next_delay(&self) -> Duration {
        let attempt = self.current_attempt.saturating_sub(1);
        let base_delay = self.policy.initial_delay;
        let multiplier = self.policy.backoff_multiplier;

        // Exponential backoff: delay = initial_delay * (multiplier ^ attempt)
        let mut delay = base_delay.mul_f64(multiplier.powi(attempt.min(63) as i32));

        // Cap at maximum delay
        if delay > self.policy.max_delay {
            delay = self.policy.max_delay;
        }

        // Add jitter (±25% of delay)
        if self.policy.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }

    fn attempts_exhausted(&self) -> bool {
        self.policy.max_attempts > 0 && self.current_attempt >= self.policy.max_attempts
    }

    /// Whether an attempt may start at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        if self.state == ReconnectState::Failed || self.attempts_exhausted() {
            return false;
        }
        self.next_attempt.map_or(true, |at| now >= at)
    }

    /// Run one attempt if it is due
    pub async fn execute_reconnect<F, Fut>(&mut self, connect_fn: F) -> Result<(), ReconnectError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), PnioError>>,
    {
        if self.attempts_exhausted() {
            if self.state != ReconnectState::Failed {
                warn!(
                    "Maximum reconnection attempts ({}) exceeded",
                    self.policy.max_attempts
                );
            }
            self.state = ReconnectState::Failed;
            return Err(ReconnectError::MaxAttemptsExceeded);
        }
        if !self.is_due(Instant::now()) {
            return Err(ReconnectError::NotDue);
        }

        self.state = ReconnectState::Reconnecting;
        self.current_attempt += 1;
        self.stats.total_attempts += 1;
        info!(
            "Starting connection attempt {}/{}",
            self.current_attempt,
            if self.policy.max_attempts == 0 {
                "∞".to_string()
            } else {
                self.policy.max_attempts.to_string()
            }
        );

        let start_time = Instant::now();
        match connect_fn().await {
            Ok(()) => {
                info!(
                    "Connected after {:?} (attempt {})",
                    start_time.elapsed(),
                    self.current_attempt
                );
                self.mark_connected();
                self.stats.successful_reconnects += 1;
                Ok(())
            },
            Err(PnioError::Busy(holder)) => {
                // Not the device's fault; try again on the next scan
                self.current_attempt -= 1;
                self.stats.total_attempts -= 1;
                self.stats.busy_rejections += 1;
                self.state = ReconnectState::Disconnected;
                Err(ReconnectError::Busy(holder))
            },
            Err(e) => {
                warn!("Connection attempt {} failed: {}", self.current_attempt, e);
                self.stats.failed_reconnects += 1;
                if self.attempts_exhausted() {
                    self.state = ReconnectState::Failed;
                } else {
                    self.state = ReconnectState::Disconnected;
                    let delay = self.calculate_next_delay();
                    debug!("Next attempt in {:?}", delay);
                    self.next_attempt = Some(Instant::now() + delay);
                }
                Err(ReconnectError::ConnectionFailed(e.to_string()))
            },
        }
    }

    /// Delay until the next attempt (for display purposes)
    pub fn next_delay(&self) -> Option<Duration> {
        if self.state == ReconnectState::Failed || self.attempts_exhausted() {
            return None;
        }
        Some(
            self.next_attempt
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or_default(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let mut helper = ReconnectHelper::new(policy(5));
        helper.current_attempt = 1;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(100));
        helper.current_attempt = 2;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(200));
        helper.current_attempt = 4;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(800));
        helper.current_attempt = 30;
        assert_eq!(helper.calculate_next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_config() {
        let p = ReconnectPolicy::from_config(&ReconnectConfig::default());
        assert_eq!(p.max_attempts, 0);
        assert_eq!(p.initial_delay, Duration::from_millis(1000));
        assert!(p.jitter);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_schedules_backoff() {
        let mut helper = ReconnectHelper::new(policy(0));
        let result = helper
            .execute_reconnect(|| async { Err(PnioError::DeviceNotFound("rtu-01".into())) })
            .await;
        assert!(matches!(result, Err(ReconnectError::ConnectionFailed(_))));
        assert!(!helper.is_due(Instant::now()));
        assert!(matches!(
            helper.execute_reconnect(|| async { Ok(()) }).await,
            Err(ReconnectError::NotDue)
        ));

        tokio::time::advance(Duration::from_millis(101)).await;
        assert!(helper.is_due(Instant::now()));
        helper.execute_reconnect(|| async { Ok(()) }).await.unwrap();
        assert_eq!(helper.state(), ReconnectState::Connected);
        assert_eq!(helper.current_attempt(), 0);
        assert_eq!(helper.stats().successful_reconnects, 1);
    }

    #[tokio::test]
    async fn test_busy_not_counted() {
        let mut helper = ReconnectHelper::new(policy(1));
        let result = helper
            .execute_reconnect(|| async { Err(PnioError::Busy("rtu-01".into())) })
            .await;
        assert!(matches!(result, Err(ReconnectError::Busy(ref h)) if h == "rtu-01"));
        assert_eq!(helper.current_attempt(), 0);
        assert_eq!(helper.stats().busy_rejections, 1);
        assert!(helper.is_due(Instant::now()));
    }

    #[tokio::test]
    async fn test_max_attempts() {
        let mut helper = ReconnectHelper::new(policy(1));
        let _ = helper
            .execute_reconnect(|| async { Err(PnioError::Aborted("rtu-01".into())) })
            .await;
        assert_eq!(helper.state(), ReconnectState::Failed);
        assert!(matches!(
            helper.execute_reconnect(|| async { Ok(()) }).await,
            Err(ReconnectError::MaxAttemptsExceeded)
        ));
        assert_eq!(helper.next_delay(), None);
    }
}
