//! Exponential backoff with full jitter, capped — spec §4.4 "Reconnect/backoff:
//! exponential with jitter, capped."

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
	base: Duration,
	factor: f64,
	max: Duration,
	attempt: u32,
}

impl Backoff {
	pub fn new(base: Duration, factor: f64, max: Duration) -> Self {
		Self {
			base,
			factor,
			max,
			attempt: 0,
		}
	}

	pub fn default_policy() -> Self {
		Self::new(Duration::from_millis(200), 2.0, Duration::from_secs(30))
	}

	/// Returns the delay to wait before the next attempt, then advances the
	/// internal attempt counter. Uses full jitter: `uniform(0, cap)`.
	pub fn next_delay(&mut self) -> Duration {
		let unjittered = self.base.as_secs_f64() * self.factor.powi(self.attempt as i32);
		let capped = unjittered.min(self.max.as_secs_f64());
		self.attempt = self.attempt.saturating_add(1);
		let jittered = rand::random::<f64>() * capped;
		Duration::from_secs_f64(jittered)
	}

	pub fn reset(&mut self) {
		self.attempt = 0;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delay_never_exceeds_cap() {
		let mut b = Backoff::new(Duration::from_millis(200), 2.0, Duration::from_secs(1));
		for _ in 0..20 {
			let d = b.next_delay();
			assert!(d <= Duration::from_secs(1));
		}
	}

	#[test]
	fn reset_restarts_growth_from_base() {
		let mut b = Backoff::new(Duration::from_millis(100), 2.0, Duration::from_secs(30));
		for _ in 0..10 {
			b.next_delay();
		}
		b.reset();
		// immediately after reset, the bound for the next delay is back near base
		let d = b.next_delay();
		assert!(d <= Duration::from_millis(100));
	}
}
