//! Retry bookkeeping shared by the table-backed work queues.

use chrono::{DateTime, Duration, Utc};

const MAX_DELAY_SECS: i64 = 7 * 24 * 60 * 60;

/// What to do with a queue row after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the row back to `pending`, due at `next_attempt_at`.
    Retry {
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Retries exhausted; the row is parked as `failed`.
    GiveUp { retry_count: i32 },
}

/// Computes the next state of a row whose attempt just failed.
///
/// `retry_count` is the count before this failure. The delay before the
/// n-th retry is `backoff_base_secs * 2^(n-1)`, capped at one week.
#[must_use]
pub fn next_retry(
    retry_count: i32,
    max_retries: i32,
    backoff_base_secs: i64,
    now: DateTime<Utc>,
) -> RetryDecision {
    let retry_count = retry_count.saturating_add(1);
    if retry_count >= max_retries {
        return RetryDecision::GiveUp { retry_count };
    }
    let exponent = u32::try_from(retry_count - 1).unwrap_or(0).min(20);
    let delay_secs = backoff_base_secs
        .saturating_mul(1_i64 << exponent)
        .clamp(0, MAX_DELAY_SECS);
    RetryDecision::Retry {
        retry_count,
        next_attempt_at: now + Duration::seconds(delay_secs),
    }
}

/// Rows claimed before the returned instant count as abandoned.
#[must_use]
pub fn claim_cutoff(now: DateTime<Utc>, claim_timeout_secs: i64) -> DateTime<Utc> {
    Duration::try_seconds(claim_timeout_secs.max(0))
        .and_then(|timeout| now.checked_sub_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn first_failure_waits_one_base_interval() {
        let decision = next_retry(0, 3, 60, at(1_000));
        assert_eq!(
            decision,
            RetryDecision::Retry {
                retry_count: 1,
                next_attempt_at: at(1_060)
            }
        );
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let decision = next_retry(1, 5, 60, at(0));
        assert_eq!(
            decision,
            RetryDecision::Retry {
                retry_count: 2,
                next_attempt_at: at(120)
            }
        );
        let decision = next_retry(3, 5, 60, at(0));
        assert_eq!(
            decision,
            RetryDecision::Retry {
                retry_count: 4,
                next_attempt_at: at(480)
            }
        );
    }

    #[test]
    fn gives_up_once_max_retries_reached() {
        assert_eq!(
            next_retry(2, 3, 60, at(0)),
            RetryDecision::GiveUp { retry_count: 3 }
        );
    }

    #[test]
    fn zero_max_retries_fails_immediately() {
        assert_eq!(
            next_retry(0, 0, 60, at(0)),
            RetryDecision::GiveUp { retry_count: 1 }
        );
    }

    #[test]
    fn huge_counts_are_capped_at_one_week() {
        let decision = next_retry(10_000, i32::MAX, i64::MAX / 2, at(0));
        assert_eq!(
            decision,
            RetryDecision::Retry {
                retry_count: 10_001,
                next_attempt_at: at(MAX_DELAY_SECS)
            }
        );
    }

    #[test]
    fn claim_cutoff_trails_now_by_the_timeout() {
        assert_eq!(claim_cutoff(at(10_000), 900), at(9_100));
        assert_eq!(claim_cutoff(at(10_000), -5), at(10_000));
        assert_eq!(claim_cutoff(at(10_000), i64::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
