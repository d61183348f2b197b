//! Wall-clock-robust delay.
//!
//! `tokio::time::sleep` is driven by a monotonic clock that, on some
//! platforms, does not advance while the host is suspended. A pool TTL of
//! "30 seconds" should still mean 30 seconds of real time after the laptop
//! wakes up, so this races a monotonic sleep against a coarse periodic probe
//! of the wall clock and fires on whichever condition is met first.

use std::time::{Duration, SystemTime};

pub const WALLCLOCK_PRECISION: Duration = Duration::from_secs(1);

/// Completes after `d` has elapsed in wall-clock time, even if the process
/// was suspended for part of that interval.
pub async fn sleep(d: Duration) {
	sleep_with_clock(d, SystemTime::now).await
}

async fn sleep_with_clock<F>(d: Duration, now: F)
where
	F: Fn() -> SystemTime,
{
	let deadline = now() + d;
	let mut ticker = tokio::time::interval(WALLCLOCK_PRECISION);
	// the first tick fires immediately; discard it so the probe only starts
	// checking after one full precision interval, matching a periodic timer.
	ticker.tick().await;

	let probe = async {
		loop {
			ticker.tick().await;
			if now() >= deadline {
				return;
			}
		}
	};

	tokio::select! {
		_ = tokio::time::sleep(d) => {}
		_ = probe => {}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use super::*;

	#[tokio::test(start_paused = true)]
	async fn fires_on_monotonic_delay_when_clock_behaves() {
		let start = tokio::time::Instant::now();
		sleep(Duration::from_millis(500)).await;
		assert!(tokio::time::Instant::now().duration_since(start) >= Duration::from_millis(500));
	}

	#[tokio::test(start_paused = true)]
	async fn fires_promptly_on_a_forward_wall_clock_jump() {
		// Simulate a host suspend: the wall clock jumps by 2*d instantly while
		// the monotonic sleep driving `tokio::time::sleep` never completes,
		// because we never advance tokio's paused time past a single probe tick.
		let base = SystemTime::now();
		let jumped = Arc::new(Mutex::new(base));
		let clock = {
			let jumped = jumped.clone();
			move || *jumped.lock().unwrap()
		};

		let d = Duration::from_secs(10);
		*jumped.lock().unwrap() = base + 2 * d;

		let fut = sleep_with_clock(d, clock);
		tokio::pin!(fut);

		// advance tokio's paused clock by one probe interval; the wall clock
		// (already jumped) should make the probe fire even though the
		// monotonic sleep has ten seconds left to run.
		tokio::time::advance(WALLCLOCK_PRECISION).await;
		tokio::time::timeout(Duration::from_millis(50), &mut fut)
			.await
			.expect("probe should have fired within one precision interval");
	}
}
