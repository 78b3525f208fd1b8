use std::time::Duration;

use crate::error::TransportError;

/// Upper bound on payment webhook attempts, the first included.
pub const MAX_ATTEMPTS: u32 = 5;

/// Fixed delay table indexed by attempt number.
///
/// `delays[n - 1]` is waited before attempt `n`; the first entry is
/// always zero. Which table is used is configuration, never computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: [Duration; MAX_ATTEMPTS as usize],
}

impl RetrySchedule {
    /// Test/demo schedule: 0, 5s, 10s, 20s, 40s.
    pub const fn accelerated() -> Self {
        Self {
            delays: [
                Duration::ZERO,
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(40),
            ],
        }
    }

    /// Production schedule: 0, 30s, 2min, 10min, 30min.
    pub const fn standard() -> Self {
        Self {
            delays: [
                Duration::ZERO,
                Duration::from_secs(30),
                Duration::from_secs(2 * 60),
                Duration::from_secs(10 * 60),
                Duration::from_secs(30 * 60),
            ],
        }
    }

    /// Pick the accelerated table when `accelerated` is set.
    pub const fn select(accelerated: bool) -> Self {
        if accelerated {
            Self::accelerated()
        } else {
            Self::standard()
        }
    }

    /// Custom table. The first entry is forced to zero.
    pub fn from_delays(mut delays: [Duration; MAX_ATTEMPTS as usize]) -> Self {
        delays[0] = Duration::ZERO;
        Self { delays }
    }

    pub fn max_attempts(&self) -> u32 {
        MAX_ATTEMPTS
    }

    /// Wait before 1-based `attempt`. Zero for attempt 1 and out-of-range values.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        match attempt {
            2..=MAX_ATTEMPTS => self.delays[(attempt - 1) as usize],
            _ => Duration::ZERO,
        }
    }

    /// Wait between `attempt` and the next one, if there is a next one.
    pub fn next_retry_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= MAX_ATTEMPTS {
            return None;
        }
        Some(self.delay_before(attempt + 1))
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::standard()
    }
}

/// How a single delivery attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptClass {
    /// 2xx.
    Delivered,
    /// 5xx or no response at all.
    Retryable,
    /// Any other status. Never retried.
    Terminal,
}

/// Classify the result of one POST. Independent of the schedule in use.
pub fn classify(result: &Result<u16, TransportError>) -> AttemptClass {
    match result {
        Ok(code) if (200..300).contains(code) => AttemptClass::Delivered,
        Ok(code) if *code >= 500 => AttemptClass::Retryable,
        Ok(_) => AttemptClass::Terminal,
        Err(_) => AttemptClass::Retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accelerated_table() {
        let s = RetrySchedule::accelerated();
        assert_eq!(s.delay_before(1), Duration::ZERO);
        assert_eq!(s.delay_before(2), Duration::from_secs(5));
        assert_eq!(s.delay_before(3), Duration::from_secs(10));
        assert_eq!(s.delay_before(4), Duration::from_secs(20));
        assert_eq!(s.delay_before(5), Duration::from_secs(40));
    }

    #[test]
    fn standard_table() {
        let s = RetrySchedule::standard();
        let expected = [0, 30, 120, 600, 1800].map(Duration::from_secs);
        assert_eq!(s.delays(), &expected);
        assert_eq!(RetrySchedule::default(), s);
    }

    #[test]
    fn select_is_a_switch() {
        assert_eq!(RetrySchedule::select(true), RetrySchedule::accelerated());
        assert_eq!(RetrySchedule::select(false), RetrySchedule::standard());
    }

    #[test]
    fn next_retry_delay_stops_at_cap() {
        let s = RetrySchedule::accelerated();
        assert_eq!(s.next_retry_delay(1), Some(Duration::from_secs(5)));
        assert_eq!(s.next_retry_delay(4), Some(Duration::from_secs(40)));
        assert_eq!(s.next_retry_delay(5), None);
        assert_eq!(s.next_retry_delay(0), None);
        assert_eq!(s.delay_before(9), Duration::ZERO);
    }

    #[test]
    fn custom_table_first_entry_is_zero() {
        let s = RetrySchedule::from_delays([Duration::from_secs(7); 5]);
        assert_eq!(s.delay_before(1), Duration::ZERO);
        assert_eq!(s.delays()[0], Duration::ZERO);
        assert_eq!(s.delay_before(2), Duration::from_secs(7));
    }

    #[test]
    fn classification() {
        assert_eq!(classify(&Ok(200)), AttemptClass::Delivered);
        assert_eq!(classify(&Ok(204)), AttemptClass::Delivered);
        assert_eq!(classify(&Ok(500)), AttemptClass::Retryable);
        assert_eq!(classify(&Ok(503)), AttemptClass::Retryable);
        assert_eq!(classify(&Ok(404)), AttemptClass::Terminal);
        assert_eq!(classify(&Ok(429)), AttemptClass::Terminal);
        assert_eq!(classify(&Ok(301)), AttemptClass::Terminal);
        assert_eq!(classify(&Err(TransportError::Timeout)), AttemptClass::Retryable);
        assert_eq!(
            classify(&Err(TransportError::Network("refused".into()))),
            AttemptClass::Retryable
        );
    }
}
