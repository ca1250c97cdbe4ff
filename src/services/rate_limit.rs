use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};

use crate::error::AppError;

/// Throttling policy for one external source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Dispatch capacity when full
    pub reservoir: u32,
    /// Capacity restored every `refill_interval`, up to `reservoir`
    pub refill_amount: u32,
    pub refill_interval: Duration,
    /// Tasks allowed in flight at once
    pub max_concurrent: usize,
    /// Minimum gap between two dispatches
    pub min_spacing: Duration,
}

struct DispatchState {
    tokens: u32,
    last_refill: Instant,
    last_dispatch: Option<Instant>,
}

impl DispatchState {
    fn refill(&mut self, policy: &RateLimitPolicy, now: Instant) {
        if policy.refill_interval.is_zero() {
            self.tokens = policy.reservoir;
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals = elapsed.as_nanos() / policy.refill_interval.as_nanos();
        if intervals == 0 {
            return;
        }

        let intervals = u32::try_from(intervals).unwrap_or(u32::MAX);
        self.tokens = self
            .tokens
            .saturating_add(intervals.saturating_mul(policy.refill_amount))
            .min(policy.reservoir);
        self.last_refill += policy.refill_interval * intervals;
    }
}

/// Reservoir + concurrency + spacing limiter in front of one external source
///
/// Callers are admitted strictly in arrival order: a caller waiting for
/// capacity holds up everyone behind it. Task errors are returned unchanged;
/// nothing is retried here.
#[derive(Clone)]
pub struct RateLimitedClient {
    name: &'static str,
    policy: RateLimitPolicy,
    dispatch: Arc<Mutex<DispatchState>>,
    running: Arc<Semaphore>,
}

impl RateLimitedClient {
    pub fn new(name: &'static str, policy: RateLimitPolicy) -> Self {
        let policy = RateLimitPolicy {
            reservoir: policy.reservoir.max(1),
            max_concurrent: policy.max_concurrent.max(1),
            ..policy
        };

        Self {
            name,
            policy,
            dispatch: Arc::new(Mutex::new(DispatchState {
                tokens: policy.reservoir,
                last_refill: Instant::now(),
                last_dispatch: None,
            })),
            running: Arc::new(Semaphore::new(policy.max_concurrent)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs `task` once the policy admits it
    pub async fn schedule<F, Fut, T, E>(&self, task: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AppError>,
    {
        let _permit = self.admit().await?;
        task().await
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit, AppError> {
        let mut dispatch = self.dispatch.lock().await;

        let permit = self
            .running
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal(format!("{} limiter is closed", self.name)))?;

        loop {
            dispatch.refill(&self.policy, Instant::now());
            if dispatch.tokens > 0 {
                break;
            }
            let next_refill = dispatch.last_refill + self.policy.refill_interval;
            tracing::debug!(limiter = self.name, "Reservoir exhausted, waiting for refill");
            sleep_until(next_refill).await;
        }

        if let Some(last) = dispatch.last_dispatch {
            sleep_until(last + self.policy.min_spacing).await;
        }

        dispatch.tokens -= 1;
        dispatch.last_dispatch = Some(Instant::now());

        Ok(permit)
    }
}
