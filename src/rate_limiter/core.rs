use crate::clock::{to_chrono, SharedClock};
use crate::events::{EngineEvent, EventBus};
use crate::rate_limiter::metrics::RATE_LIMITER_METRICS;
use crate::rate_limiter::{
    LimitConfig, LimitReason, RateLimiterConfig, RateLimiterError, RateLimiterResult, TokenBucket,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Suggested wait when a concurrency cap rejects a request
const CONCURRENCY_RETRY_HINT: Duration = Duration::from_secs(1);

/// Shortest sleep between polls in `wait_for_limit`
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of one admission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub reason: Option<LimitReason>,
    /// Suggested wait before trying again; zero when allowed
    pub retry_after: Duration,
    /// Resource tokens left after this decision
    pub remaining: u32,
}

impl RateLimitDecision {
    fn allowed(remaining: u32) -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after: Duration::ZERO,
            remaining,
        }
    }

    fn denied(reason: LimitReason, retry_after: Duration, remaining: u32) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after,
            remaining,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub resource: String,
    pub available_tokens: u32,
    pub max_tokens: u32,
    pub active_requests: u32,
    pub max_concurrent: u32,
    pub last_request: Option<DateTime<Utc>>,
    pub full_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RateLimiterStats {
    pub total_checks: u64,
    pub allowed: u64,
    pub rejected: u64,
    pub rejected_by_reason: HashMap<LimitReason, u64>,
    pub global_active_requests: u32,
    pub tracked_resources: usize,
    pub evicted_resources: u64,
}

#[derive(Debug)]
struct ResourceState {
    limits: LimitConfig,
    bucket: TokenBucket,
    last_request: Option<DateTime<Utc>>,
    active: u32,
}

impl ResourceState {
    fn new(limits: LimitConfig, now: DateTime<Utc>) -> Self {
        Self {
            bucket: TokenBucket::new(limits.max_requests, limits.window(), now),
            limits,
            last_request: None,
            active: 0,
        }
    }

    /// Indistinguishable from a freshly created state
    fn is_idle(&mut self, now: DateTime<Utc>) -> bool {
        self.active == 0
            && self.bucket.available(now) == self.bucket.max_tokens()
            && self
                .last_request
                .map_or(true, |at| now - at >= to_chrono(self.limits.min_delay()))
    }
}

#[derive(Debug)]
struct LimiterState {
    resources: HashMap<String, ResourceState>,
    global_bucket: TokenBucket,
    global_active: u32,
    stats: RateLimiterStats,
}

impl LimiterState {
    fn evict_idle(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let idle: Vec<String> = self
            .resources
            .iter_mut()
            .filter_map(|(name, res)| res.is_idle(now).then(|| name.clone()))
            .collect();
        for name in &idle {
            self.resources.remove(name);
        }
        self.stats.evicted_resources += idle.len() as u64;
        idle
    }
}

/// Per-resource plus global admission control
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
    clock: SharedClock,
    events: EventBus,
}

impl RateLimiter {
    pub fn new(
        config: RateLimiterConfig,
        clock: SharedClock,
        events: EventBus,
    ) -> RateLimiterResult<Self> {
        config.validate()?;
        let now = clock.now();
        let global_bucket = TokenBucket::new(config.global.max_requests, config.global.window(), now);

        Ok(Self {
            state: Mutex::new(LimiterState {
                resources: HashMap::new(),
                global_bucket,
                global_active: 0,
                stats: RateLimiterStats::default(),
            }),
            config,
            clock,
            events,
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Decide whether one request to `resource` may start now.
    ///
    /// An allowed decision consumes a resource token and a global token.
    /// A rejection consumes nothing.
    pub fn check_limit(&self, resource: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let (decision, evicted) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let evicted = self.make_room(state, resource, now);
            let res = state
                .resources
                .entry(resource.to_string())
                .or_insert_with(|| ResourceState::new(self.config.for_resource(resource).clone(), now));

            let decision = evaluate(
                res,
                &mut state.global_bucket,
                state.global_active,
                &self.config.global,
                now,
            );

            state.stats.total_checks += 1;
            match decision.reason {
                None => state.stats.allowed += 1,
                Some(reason) => {
                    state.stats.rejected += 1;
                    *state.stats.rejected_by_reason.entry(reason).or_insert(0) += 1;
                }
            }
            (decision, evicted)
        };

        self.forget(&evicted);
        self.report(resource, &decision);
        decision
    }

    /// Before tracking a new resource at capacity, drop the idle ones
    fn make_room(
        &self,
        state: &mut LimiterState,
        resource: &str,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        if state.resources.len() < self.config.max_tracked_resources
            || state.resources.contains_key(resource)
        {
            return Vec::new();
        }
        state.evict_idle(now)
    }

    fn forget(&self, evicted: &[String]) {
        if evicted.is_empty() {
            return;
        }
        for resource in evicted {
            let _ = RATE_LIMITER_METRICS
                .active_requests
                .remove_label_values(&[resource]);
        }
        debug!(count = evicted.len(), "Dropped idle rate limit resources");
    }

    /// Drop every resource whose bucket is full with nothing in flight.
    /// Returns how many were dropped.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let evicted = self.state.lock().evict_idle(now);
        self.forget(&evicted);
        evicted.len()
    }

    fn report(&self, resource: &str, decision: &RateLimitDecision) {
        let (outcome, reason): (&str, &'static str) = match decision.reason {
            None => ("allowed", "none"),
            Some(reason) => ("rejected", reason.into()),
        };
        RATE_LIMITER_METRICS
            .decisions
            .with_label_values(&[resource, outcome, reason])
            .inc();

        if decision.allowed {
            debug!(resource = %resource, remaining = decision.remaining, "Request admitted");
        } else {
            debug!(
                resource = %resource,
                reason = reason,
                retry_after_ms = decision.retry_after.as_millis() as u64,
                "Request rejected"
            );
        }

        if !self.config.emit_events {
            return;
        }
        self.events.publish(match decision.reason {
            None => EngineEvent::RateLimitAllowed {
                resource: resource.to_string(),
                remaining: decision.remaining,
            },
            Some(reason) => EngineEvent::RateLimitRejected {
                resource: resource.to_string(),
                reason,
                retry_after_ms: decision.retry_after.as_millis() as u64,
            },
        });
    }

    /// Strict admission: a rejection becomes an error, an admission starts the request
    pub fn try_acquire(&self, resource: &str) -> RateLimiterResult<RequestPermit<'_>> {
        let decision = self.check_limit(resource);
        match decision.reason {
            None => Ok(self.start_request(resource)),
            Some(reason) => Err(RateLimiterError::Exceeded {
                resource: resource.to_string(),
                reason,
                retry_after_ms: decision.retry_after.as_millis() as u64,
            }),
        }
    }

    /// Poll `check_limit` until admitted or `timeout` (default from config) elapses.
    ///
    /// Each individual sleep follows the suggested retry time but never exceeds
    /// `max_wait_step_ms`.
    pub async fn wait_for_limit(
        &self,
        resource: &str,
        timeout: Option<Duration>,
    ) -> RateLimiterResult<RateLimitDecision> {
        let timeout = timeout.unwrap_or_else(|| self.config.wait_timeout());
        let started = self.clock.now();
        let deadline = started + crate::clock::to_chrono(timeout);

        loop {
            let decision = self.check_limit(resource);
            if decision.allowed {
                return Ok(decision);
            }

            let now = self.clock.now();
            let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                let waited_ms = (now - started).num_milliseconds().max(0) as u64;
                warn!(resource = %resource, waited_ms, "Gave up waiting for rate limit");
                return Err(RateLimiterError::Timeout {
                    resource: resource.to_string(),
                    waited_ms,
                });
            }

            let wait = decision
                .retry_after
                .min(self.config.max_wait_step())
                .max(MIN_POLL_INTERVAL)
                .min(remaining);
            self.clock.sleep(wait).await;
        }
    }

    /// Wait for admission and start the request
    pub async fn acquire(
        &self,
        resource: &str,
        timeout: Option<Duration>,
    ) -> RateLimiterResult<RequestPermit<'_>> {
        self.wait_for_limit(resource, timeout).await?;
        Ok(self.start_request(resource))
    }

    /// Record a request start; the permit ends it when dropped
    pub fn start_request(&self, resource: &str) -> RequestPermit<'_> {
        self.begin(resource);
        RequestPermit {
            limiter: self,
            resource: resource.to_string(),
            active: true,
        }
    }

    /// Record a request start without a permit; pair with `end_request`
    pub fn begin(&self, resource: &str) {
        let now = self.clock.now();
        let (active, evicted) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let evicted = self.make_room(state, resource, now);
            let res = state
                .resources
                .entry(resource.to_string())
                .or_insert_with(|| ResourceState::new(self.config.for_resource(resource).clone(), now));
            res.active += 1;
            res.last_request = Some(now);
            state.global_active += 1;
            (res.active, evicted)
        };
        self.forget(&evicted);
        RATE_LIMITER_METRICS
            .active_requests
            .with_label_values(&[resource])
            .set(active as f64);
    }

    /// Record a request end
    pub fn end_request(&self, resource: &str) {
        let active = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.resources.get_mut(resource) {
                Some(res) if res.active > 0 => {
                    res.active -= 1;
                    state.global_active = state.global_active.saturating_sub(1);
                    res.active
                }
                _ => return,
            }
        };
        RATE_LIMITER_METRICS
            .active_requests
            .with_label_values(&[resource])
            .set(active as f64);
    }

    pub fn status(&self, resource: &str) -> ResourceStatus {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let res = guard
            .resources
            .entry(resource.to_string())
            .or_insert_with(|| ResourceState::new(self.config.for_resource(resource).clone(), now));

        ResourceStatus {
            resource: resource.to_string(),
            available_tokens: res.bucket.available(now),
            max_tokens: res.bucket.max_tokens(),
            active_requests: res.active,
            max_concurrent: res.limits.max_concurrent,
            last_request: res.last_request,
            full_at: res.bucket.full_at(now),
        }
    }

    /// Forget a resource's bucket and spacing; in-flight counts are kept
    pub fn reset(&self, resource: &str) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if let Some(res) = state.resources.get_mut(resource) {
            res.bucket.reset(now);
            res.last_request = None;
        }
        debug!(resource = %resource, "Rate limit reset");
    }

    /// Refill every bucket including the global one
    pub fn reset_all(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        for res in state.resources.values_mut() {
            res.bucket.reset(now);
            res.last_request = None;
        }
        state.global_bucket.reset(now);
        debug!("All rate limits reset");
    }

    pub fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock();
        RateLimiterStats {
            global_active_requests: state.global_active,
            tracked_resources: state.resources.len(),
            ..state.stats.clone()
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish()
    }
}

/// Ordered checks; the first failing check names the reason
fn evaluate(
    res: &mut ResourceState,
    global_bucket: &mut TokenBucket,
    global_active: u32,
    global_limits: &LimitConfig,
    now: DateTime<Utc>,
) -> RateLimitDecision {
    let remaining = res.bucket.available(now);

    if res.active >= res.limits.max_concurrent || global_active >= global_limits.max_concurrent {
        return RateLimitDecision::denied(
            LimitReason::ConcurrentLimit,
            CONCURRENCY_RETRY_HINT,
            remaining,
        );
    }

    if let Some(last) = res.last_request {
        let ready_at = last + crate::clock::to_chrono(res.limits.min_delay());
        if now < ready_at {
            let wait = (ready_at - now).to_std().unwrap_or(Duration::ZERO);
            return RateLimitDecision::denied(LimitReason::MinDelay, wait, remaining);
        }
    }

    if !res.bucket.try_consume(now) {
        let wait = res.bucket.time_until_token(now);
        return RateLimitDecision::denied(LimitReason::EngineLimit, wait, 0);
    }

    if !global_bucket.try_consume(now) {
        // Exactly the one token taken above goes back
        res.bucket.refund(1);
        let wait = global_bucket.time_until_token(now);
        return RateLimitDecision::denied(LimitReason::GlobalLimit, wait, res.bucket.available(now));
    }

    RateLimitDecision::allowed(res.bucket.available(now))
}

/// An admitted in-flight request; ends the request when dropped
pub struct RequestPermit<'a> {
    limiter: &'a RateLimiter,
    resource: String,
    active: bool,
}

impl RequestPermit<'_> {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// End the request now
    pub fn release(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.active {
            self.active = false;
            self.limiter.end_request(&self.resource);
        }
    }
}

impl Drop for RequestPermit<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for RequestPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPermit")
            .field("resource", &self.resource)
            .field("active", &self.active)
            .finish()
    }
}
