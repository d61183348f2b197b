use std::time::Duration;

pub use internal::{DrainMode, ReleaseShutdown as DrainBlocker, Signal as DrainTrigger, Watch as DrainWatcher};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Constructs a new pair for draining.
/// * `DrainTrigger` starts a draining sequence and waits for it to complete.
/// * `DrainWatcher` is held by anything that wants to participate in the drain. It can be
///   cloned, and a drain will not complete until all outstanding watchers are dropped.
pub fn new() -> (DrainTrigger, DrainWatcher) {
	internal::channel()
}

/// Runs a future with graceful shutdown support. The caller's future receives a
/// `DrainWatcher` (hold onto it while active work is in flight, watch it to learn when to
/// start winding down) and a `force_shutdown` receiver that fires once the grace period named
/// by `deadline` has elapsed with outstanding watchers still alive.
pub async fn run_with_drain<F, O>(component: String, drain: DrainWatcher, deadline: Duration, make_future: F)
where
	F: AsyncFnOnce(DrainWatcher, watch::Receiver<()>) -> O,
	O: Send + 'static,
{
	let (sub_drain_signal, sub_drain) = new();
	let (trigger_force_shutdown, force_shutdown) = watch::channel(());
	let trigger_force_shutdown_cpy = trigger_force_shutdown.clone();

	let fut = make_future(sub_drain, force_shutdown);
	let watch = async move {
		let res = drain.wait_for_drain().await;
		if res.mode() == DrainMode::Graceful {
			info!(component, "drain started, waiting {:?} for work to complete", deadline);
			if tokio::time::timeout(deadline, sub_drain_signal.start_drain_and_wait(DrainMode::Graceful))
				.await
				.is_err()
			{
				warn!(component, "drain deadline expired with work pending, forcing shutdown");
			}
		} else {
			debug!(component, "terminating");
		}
		let _ = trigger_force_shutdown.send(());
		info!(component, "shutdown complete");
	};
	tokio::select! {
		_ = fut => {
			let _ = trigger_force_shutdown_cpy.send(());
		},
		_ = watch => {}
	}
}

mod internal {
	use tokio::sync::{mpsc, watch};

	/// Creates a drain channel. The `Signal` starts a drain; the `Watch` is notified when one
	/// is signaled.
	pub fn channel() -> (Signal, Watch) {
		let (signal_tx, signal_rx) = watch::channel(None);
		let (drained_tx, drained_rx) = mpsc::channel(1);

		let signal = Signal { drained_rx, signal_tx };
		let watch = Watch { drained_tx, signal_rx };
		(signal, watch)
	}

	enum Never {}

	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub enum DrainMode {
		Immediate,
		Graceful,
	}

	/// Sends a drain command to all watchers.
	pub struct Signal {
		drained_rx: mpsc::Receiver<Never>,
		signal_tx: watch::Sender<Option<DrainMode>>,
	}

	/// Watches for a drain command. All `Watch` instances must be dropped for a
	/// `Signal::start_drain_and_wait` call to complete.
	#[derive(Clone)]
	pub struct Watch {
		drained_tx: mpsc::Sender<Never>,
		signal_rx: watch::Receiver<Option<DrainMode>>,
	}

	#[must_use = "DrainBlocker should be dropped explicitly to release the drain"]
	#[derive(Clone)]
	#[allow(dead_code)]
	pub struct ReleaseShutdown(mpsc::Sender<Never>, DrainMode);

	impl ReleaseShutdown {
		pub fn mode(&self) -> DrainMode {
			self.1
		}
	}

	impl Signal {
		/// Waits for all `Watch` instances to be dropped.
		pub async fn closed(&mut self) {
			self.signal_tx.closed().await;
		}

		pub fn count(&self) -> usize {
			self.signal_tx.receiver_count()
		}

		/// Signals all watchers to begin draining and waits for every handle to be dropped.
		pub async fn start_drain_and_wait(mut self, mode: DrainMode) {
			let _ = self.signal_tx.send(Some(mode));
			match self.drained_rx.recv().await {
				None => {}
				Some(n) => match n {},
			}
		}
	}

	impl Watch {
		/// Returns a `DrainBlocker` once the drain has been signaled. Drop it once the
		/// in-flight work it represents has finished, to unblock the waiting trigger.
		pub async fn wait_for_drain(mut self) -> ReleaseShutdown {
			let mode = self
				.signal_rx
				.wait_for(Option::is_some)
				.await
				.map(|mode| mode.expect("already asserted is_some"))
				// Signal was dropped entirely without ever firing; treat as an immediate exit.
				.unwrap_or(DrainMode::Immediate);
			ReleaseShutdown(self.drained_tx, mode)
		}
	}

	impl std::fmt::Debug for Signal {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			f.debug_struct("Signal").finish_non_exhaustive()
		}
	}

	impl std::fmt::Debug for Watch {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			f.debug_struct("Watch").finish_non_exhaustive()
		}
	}

	impl std::fmt::Debug for ReleaseShutdown {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			f.debug_struct("ReleaseShutdown").finish_non_exhaustive()
		}
	}
}

#[cfg(test)]
mod test {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	use super::DrainMode::Graceful;
	use super::*;

	#[tokio::test]
	async fn graceful_drain_waits_for_all_watchers() {
		let (trigger, watcher) = new();
		let completed = Arc::new(AtomicUsize::new(0));
		let (dummy_tx, _) = tokio::sync::broadcast::channel::<()>(1);

		for i in 1..=3u64 {
			let mut dummy_rx = dummy_tx.subscribe();
			let completed = completed.clone();
			let watcher = watcher.clone();
			tokio::spawn(async move {
				let blocker = watcher.wait_for_drain().await;
				tokio::time::sleep(Duration::from_millis(i * 10)).await;
				let _ = dummy_rx.recv().await;
				completed.fetch_add(1, Ordering::SeqCst);
				drop(blocker);
			});
		}
		drop(watcher);

		assert_eq!(completed.load(Ordering::SeqCst), 0);
		let _ = dummy_tx.send(());

		tokio::select! {
			_ = tokio::time::sleep(Duration::from_millis(200)) => panic!("timeout"),
			_ = trigger.start_drain_and_wait(Graceful) => {
				assert_eq!(completed.load(Ordering::SeqCst), 3);
			}
		}
	}

	#[cfg(not(miri))]
	#[tokio::test]
	async fn drain_times_out_with_stuck_watcher() {
		let (trigger, watcher) = new();
		let watcher2 = watcher.clone();
		drop(watcher);

		tokio::spawn(async move {
			let _blocker = watcher2.wait_for_drain().await;
			std::future::pending::<()>().await
		});

		tokio::select! {
			_ = tokio::time::sleep(Duration::from_millis(50)) => {}
			_ = trigger.start_drain_and_wait(Graceful) => {
				panic!("drain should not complete: the watcher never released")
			}
		}
	}
}
