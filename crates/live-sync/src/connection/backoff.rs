use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Exponential reconnect delays: `min(base * 2^attempt, max_delay)`, for at most
/// `max_attempts` retries in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
	pub base: Duration,
	pub max_delay: Duration,
	pub max_attempts: u32,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			base: DEFAULT_BASE_DELAY,
			max_delay: DEFAULT_MAX_DELAY,
			max_attempts: DEFAULT_MAX_ATTEMPTS,
		}
	}
}

impl BackoffPolicy {
	#[must_use]
	pub fn delay_for(&self, attempt: u32) -> Duration {
		1_u32
			.checked_shl(attempt)
			.and_then(|factor| self.base.checked_mul(factor))
			.map_or(self.max_delay, |delay| delay.min(self.max_delay))
	}

	#[must_use]
	pub const fn is_exhausted(&self, attempt: u32) -> bool {
		attempt >= self.max_attempts
	}
}

/// Consecutive failures since the last successful subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
	pub attempt: u32,
	pub last_delay: Duration,
}

impl RetryState {
	pub fn reset(&mut self) {
		*self = Self::default();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delays_double_until_capped() {
		let policy = BackoffPolicy::default();

		let delays = (0..5).map(|attempt| policy.delay_for(attempt)).collect::<Vec<_>>();

		assert_eq!(
			delays,
			[2_000, 4_000, 8_000, 16_000, 30_000].map(Duration::from_millis)
		);
	}

	#[test]
	fn huge_attempts_saturate_at_cap() {
		let policy = BackoffPolicy::default();

		assert_eq!(policy.delay_for(31), policy.max_delay);
		assert_eq!(policy.delay_for(32), policy.max_delay);
		assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
	}

	#[test]
	fn exhausted_at_max_attempts() {
		let policy = BackoffPolicy {
			max_attempts: 2,
			..Default::default()
		};

		assert!(!policy.is_exhausted(0));
		assert!(!policy.is_exhausted(1));
		assert!(policy.is_exhausted(2));
	}
}
