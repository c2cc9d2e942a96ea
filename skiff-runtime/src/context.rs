//! Per-invocation context

use std::sync::Arc;

use crate::env::RuntimeEnv;

/// Millisecond clock, injectable for tests
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Invocation context passed to the handler
///
/// Built fresh per invocation and discarded after use.
#[derive(Clone)]
pub struct Context {
    pub request_id: String,
    pub function_name: String,
    pub function_version: String,
    pub memory_limit_in_mb: String,
    pub deadline_ms: i64,
    clock: Arc<dyn Clock>,
}

impl Context {
    pub fn new(
        request_id: impl Into<String>,
        deadline_ms: i64,
        env: &RuntimeEnv,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            function_name: env.function_name.clone(),
            function_version: env.function_version.clone(),
            memory_limit_in_mb: env.memory_limit_in_mb.clone(),
            deadline_ms,
            clock,
        }
    }

    /// Milliseconds until the invocation deadline
    ///
    /// Recomputed against the clock on every call, never cached. Goes
    /// negative once the deadline has passed.
    pub fn remaining_time_in_millis(&self) -> i64 {
        self.deadline_ms - self.clock.now_ms()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("function_name", &self.function_name)
            .field("function_version", &self.function_version)
            .field("memory_limit_in_mb", &self.memory_limit_in_mb)
            .field("deadline_ms", &self.deadline_ms)
            .finish_non_exhaustive()
    }
}
