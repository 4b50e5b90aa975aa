//! Per-pipeline error-handling policy and the circuit-breaker
//! state machine it drives for each sink.

use std::time::{Duration, Instant};

use crate::config::{ErrorHandlingStrategy, PipelineConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// One circuit breaker per sink. Not `Send`-shared directly; the pipeline
/// manager owns one per sink worker.
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    consecutive_failures: u32,
    state: CircuitState,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            threshold: config.circuit_breaker_threshold,
            timeout: Duration::from_secs(config.circuit_breaker_timeout_seconds),
            consecutive_failures: 0,
            state: CircuitState::Closed,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a send should be attempted right now. Transitions `Open` to
    /// `HalfOpen` once the timeout elapses, allowing a single probe.
    pub fn should_attempt(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.opened_at.map(|t| t.elapsed() >= self.timeout).unwrap_or(false) {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.state == CircuitState::HalfOpen || self.consecutive_failures >= self.threshold {
            self.state = CircuitState::Open;
            self.opened_at = Some(Instant::now());
        }
    }
}

/// Computes the retry delay for attempt `n` (0-indexed) under exponential
/// backoff, same shape as the receiver's reconnect schedule.
pub fn retry_delay(config: &PipelineConfig, attempt: u32) -> Duration {
    let base = config.retry_delay_seconds as f64;
    let factor = config.backoff_multiplier.powi(attempt as i32);
    Duration::from_secs_f64((base * factor).max(0.0))
}

/// What to do after a sink send fails, per the pipeline's configured
/// [`ErrorHandlingStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    StopPipeline,
    LogAndContinue,
    RetryAfter(u32),
    Shed,
}

pub fn decide(
    strategy: ErrorHandlingStrategy,
    attempt: u32,
    max_retries: u32,
    breaker: Option<&mut CircuitBreaker>,
) -> PolicyOutcome {
    match strategy {
        ErrorHandlingStrategy::FailFast => PolicyOutcome::StopPipeline,
        ErrorHandlingStrategy::Continue => PolicyOutcome::LogAndContinue,
        ErrorHandlingStrategy::Retry => {
            if attempt < max_retries {
                PolicyOutcome::RetryAfter(attempt + 1)
            } else {
                PolicyOutcome::LogAndContinue
            }
        }
        ErrorHandlingStrategy::CircuitBreaker => {
            if let Some(breaker) = breaker {
                breaker.record_failure();
                if breaker.state() == CircuitState::Open {
                    return PolicyOutcome::Shed;
                }
            }
            PolicyOutcome::LogAndContinue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline_config() -> PipelineConfig {
        PipelineConfig {
            circuit_breaker_threshold: 3,
            circuit_breaker_timeout_seconds: 60,
            ..Default::default()
        }
    }

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let mut breaker = CircuitBreaker::new(&pipeline_config());
        assert!(breaker.should_attempt());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.should_attempt());
    }

    #[test]
    fn breaker_recloses_on_success() {
        let mut breaker = CircuitBreaker::new(&pipeline_config());
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn retry_delay_grows_exponentially() {
        let config = PipelineConfig {
            retry_delay_seconds: 1,
            backoff_multiplier: 2.0,
            ..Default::default()
        };
        assert_eq!(retry_delay(&config, 0).as_secs(), 1);
        assert_eq!(retry_delay(&config, 2).as_secs(), 4);
    }
}
