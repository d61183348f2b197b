//! The warm connection pool: N workers each maintaining one dialed, probed
//! upstream connection, handed off to consumers in constant time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::dial::Dialer;
use crate::queue::RaQueue;
use crate::wallclock;
use crate::watched::{self, ProbeOutcome, WatchedConn};

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
	/// Number of warm slots maintained (>= 1).
	pub size: usize,
	/// Maximum idle lifetime of a warm connection before it is discarded and redialed.
	pub ttl: Duration,
	/// Delay inserted after a dial failure or a disrupted warm connection.
	pub backoff: Duration,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetError {
	#[error("get cancelled")]
	Cancelled,
}

struct State<S> {
	prepared: RaQueue<oneshot::Receiver<WatchedConn<S>>>,
	waiters: RaQueue<oneshot::Sender<S>>,
}

impl<S> State<S> {
	fn new() -> Self {
		Self {
			prepared: RaQueue::new(),
			waiters: RaQueue::new(),
		}
	}
}

pub struct ConnPool<D: Dialer> {
	dialer: D,
	config: PoolConfig,
	state: Mutex<State<D::Stream>>,
	cancel: CancellationToken,
	workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: Dialer> ConnPool<D> {
	pub fn new(dialer: D, config: PoolConfig) -> Arc<Self> {
		assert!(config.size >= 1, "pool size must be at least 1");
		Arc::new(Self {
			dialer,
			config,
			state: Mutex::new(State::new()),
			cancel: CancellationToken::new(),
			workers: Mutex::new(Vec::new()),
		})
	}

	/// Spawns exactly `config.size` worker tasks. Callers are expected to
	/// start the pool once.
	pub async fn start(self: &Arc<Self>) {
		let mut workers = self.workers.lock().await;
		for _ in 0..self.config.size {
			let pool = self.clone();
			workers.push(tokio::spawn(async move { pool.worker_loop().await }));
		}
	}

	/// Signals all workers to exit and blocks until every one has
	/// returned, closing any warm connection still held by a worker.
	pub async fn stop(self: &Arc<Self>) {
		self.cancel.cancel();
		let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
		for handle in handles {
			let _ = handle.await;
		}
	}

	/// Obtains a warm stream, or `Cancelled` if `cancel` fires or the pool
	/// is shutting down first.
	pub async fn get(&self, cancel: CancellationToken) -> Result<D::Stream, GetError> {
		let hit = {
			let mut state = self.state.lock().await;
			state.prepared.pop_front()
		};

		if let Some(rx) = hit {
			return tokio::select! {
				biased;
				_ = self.cancel.cancelled() => Err(GetError::Cancelled),
				_ = cancel.cancelled() => Err(GetError::Cancelled),
				watched = rx => {
					match watched {
						Ok(mut watched) => {
							watched.cancel_watch();
							watched.await_done().await;
							Ok(watched.into_stream())
						}
						Err(_) => Err(GetError::Cancelled),
					}
				}
			};
		}

		let (tx, rx) = oneshot::channel();
		let id = {
			let mut state = self.state.lock().await;
			state.waiters.push(tx)
		};

		tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				let mut state = self.state.lock().await;
				// If a worker already popped our slot we must still drain the
				// stream it is about to (or already did) hand us, so it is
				// never silently leaked.
				if state.waiters.delete(id).is_none() {
					drop(state);
					if let Ok(stream) = rx.await {
						drop(stream);
					}
				}
				Err(GetError::Cancelled)
			}
			_ = self.cancel.cancelled() => Err(GetError::Cancelled),
			stream = rx => stream.map_err(|_| GetError::Cancelled),
		}
	}

	async fn dial_or_backoff(&self) -> Option<D::Stream> {
		loop {
			if self.cancel.is_cancelled() {
				return None;
			}
			let dial = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return None,
				res = self.dialer.dial(self.cancel.child_token()) => res,
			};
			match dial {
				Ok(stream) => return Some(stream),
				Err(e) => {
					if self.cancel.is_cancelled() {
						return None;
					}
					error!(error = %e, "upstream dial failed");
					tokio::select! {
						_ = self.cancel.cancelled() => return None,
						_ = wallclock::sleep(self.config.backoff) => {}
					}
				}
			}
		}
	}

	/// Removes the entry keyed by `id` from `prepared`. Returns `true` if a
	/// consumer had already popped it (nothing left to close), `false` if
	/// it was still sitting unclaimed (dropping it closes the stream).
	async fn retire(&self, id: crate::queue::Lsn) -> bool {
		let removed = {
			let mut state = self.state.lock().await;
			state.prepared.delete(id)
		};
		removed.is_none()
	}

	async fn worker_loop(self: Arc<Self>) {
		loop {
			let Some(stream) = self.dial_or_backoff().await else {
				return;
			};
			debug!("established upstream connection");

			// Step 2: fuse directly with a waiting consumer if one exists.
			let waiter = {
				let mut state = self.state.lock().await;
				state.waiters.pop_front()
			};
			if let Some(waiter_tx) = waiter {
				if waiter_tx.send(stream).is_err() {
					debug!("waiter vanished before fused stream could be delivered");
				}
				continue;
			}

			// Step 3: arm the watcher and publish to `prepared`.
			let watched = watched::arm_watcher(stream);
			let watch_cancel = watched.cancel_handle();
			let mut worker_done = watched.done_handle();

			let (tx, rx) = oneshot::channel();
			let id = {
				let mut state = self.state.lock().await;
				state.prepared.push(rx)
			};
			// The value is available the instant a consumer pops the
			// receiver; whether it ever gets popped is exactly the race
			// `retire` resolves below.
			let _ = tx.send(watched);

			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => {
					watch_cancel.cancel();
					let _ = worker_done.changed().await;
					self.retire(id).await;
					return;
				}
				_ = worker_done.changed() => {
					let outcome = *worker_done.borrow();
					let already_consumed = self.retire(id).await;
					if !already_consumed {
						match outcome {
							Some(ProbeOutcome::Disrupted) | None => {
								warn!("warm connection disrupted while idle");
							}
							Some(ProbeOutcome::Cancelled) => {
								// Cancelled without ever being popped can only
								// happen if the pool is shutting down and the
								// shutdown branch above lost the race; treat
								// the same as a disruption for backoff purposes.
							}
						}
						tokio::select! {
							_ = self.cancel.cancelled() => return,
							_ = wallclock::sleep(self.config.backoff) => {}
						}
					}
					// else: delivered to a consumer, who cancelled the probe
					// themselves; redial immediately, no backoff.
				}
				_ = wallclock::sleep(self.config.ttl) => {
					watch_cancel.cancel();
					let _ = worker_done.changed().await;
					self.retire(id).await;
					debug!("warm connection expired, redialing");
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use async_trait::async_trait;
	use tokio::io::DuplexStream;
	use tokio::sync::mpsc;

	use super::*;
	use crate::dial::DialError;

	struct TestDialer {
		dial_count: Arc<AtomicUsize>,
		remotes: mpsc::UnboundedSender<DuplexStream>,
	}

	#[async_trait]
	impl Dialer for TestDialer {
		type Stream = DuplexStream;

		async fn dial(&self, cancel: CancellationToken) -> Result<Self::Stream, DialError> {
			if cancel.is_cancelled() {
				return Err(DialError::Cancelled);
			}
			self.dial_count.fetch_add(1, Ordering::SeqCst);
			let (ours, theirs) = tokio::io::duplex(64);
			let _ = self.remotes.send(theirs);
			Ok(ours)
		}
	}

	fn test_dialer() -> (TestDialer, Arc<AtomicUsize>, mpsc::UnboundedReceiver<DuplexStream>) {
		let dial_count = Arc::new(AtomicUsize::new(0));
		let (tx, rx) = mpsc::unbounded_channel();
		(
			TestDialer {
				dial_count: dial_count.clone(),
				remotes: tx,
			},
			dial_count,
			rx,
		)
	}

	#[tokio::test]
	async fn happy_path_delivers_distinct_warm_streams() {
		let (dialer, dial_count, _remotes) = test_dialer();
		let pool = ConnPool::new(
			dialer,
			PoolConfig {
				size: 2,
				ttl: Duration::from_secs(30),
				backoff: Duration::from_millis(50),
			},
		);
		pool.start().await;

		let _a = tokio::time::timeout(Duration::from_secs(1), pool.get(CancellationToken::new()))
			.await
			.unwrap()
			.unwrap();
		let _b = tokio::time::timeout(Duration::from_secs(1), pool.get(CancellationToken::new()))
			.await
			.unwrap()
			.unwrap();

		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(dial_count.load(Ordering::SeqCst) >= 3, "replacements should be redialed eagerly");

		pool.stop().await;
	}

	#[tokio::test]
	async fn disruption_triggers_backoff_then_redial() {
		let (dialer, dial_count, mut remotes) = test_dialer();
		let pool = ConnPool::new(
			dialer,
			PoolConfig {
				size: 1,
				ttl: Duration::from_secs(30),
				backoff: Duration::from_millis(80),
			},
		);
		pool.start().await;

		let first_remote = tokio::time::timeout(Duration::from_millis(200), remotes.recv())
			.await
			.unwrap()
			.unwrap();
		drop(first_remote); // peer closes -> probe observes disruption

		tokio::time::sleep(Duration::from_millis(40)).await;
		assert_eq!(dial_count.load(Ordering::SeqCst), 1, "redial should wait out the backoff");

		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(dial_count.load(Ordering::SeqCst), 2, "backoff should have elapsed by now");

		pool.stop().await;
	}

	#[tokio::test]
	async fn ttl_expiry_recycles_idle_connection() {
		let (dialer, dial_count, _remotes) = test_dialer();
		let pool = ConnPool::new(
			dialer,
			PoolConfig {
				size: 1,
				ttl: Duration::from_millis(100),
				backoff: Duration::from_millis(10),
			},
		);
		pool.start().await;

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(dial_count.load(Ordering::SeqCst), 1);

		tokio::time::sleep(Duration::from_millis(150)).await;
		assert!(dial_count.load(Ordering::SeqCst) >= 2, "idle connection should have expired and been replaced");

		pool.stop().await;
	}

	#[tokio::test]
	async fn cancelled_get_returns_promptly_and_never_leaks_the_late_stream() {
		let (dialer, _dial_count, _remotes) = test_dialer();
		let pool = ConnPool::new(
			dialer,
			PoolConfig {
				size: 1,
				ttl: Duration::from_secs(30),
				backoff: Duration::from_millis(10),
			},
		);
		// Don't start workers: `get` immediately becomes a waiter with
		// nothing ever arriving from a dial.
		let cancel = CancellationToken::new();
		let cancel_clone = cancel.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(30)).await;
			cancel_clone.cancel();
		});

		let result = tokio::time::timeout(Duration::from_millis(200), pool.get(cancel))
			.await
			.unwrap();
		assert!(matches!(result, Err(GetError::Cancelled)));
	}

	/// Never produces a stream; just waits to be cancelled. Lets the
	/// shutdown test exercise pure waiter-cancellation without racing a
	/// real dial that might fuse with one of the waiters first.
	struct BlockingDialer;

	#[async_trait]
	impl Dialer for BlockingDialer {
		type Stream = DuplexStream;

		async fn dial(&self, cancel: CancellationToken) -> Result<Self::Stream, DialError> {
			cancel.cancelled().await;
			Err(DialError::Cancelled)
		}
	}

	#[tokio::test]
	async fn shutdown_cancels_all_outstanding_waiters() {
		let pool = ConnPool::new(
			BlockingDialer,
			PoolConfig {
				size: 4,
				ttl: Duration::from_secs(30),
				backoff: Duration::from_millis(10),
			},
		);
		pool.start().await;

		let mut handles = Vec::new();
		for _ in 0..20 {
			let pool = pool.clone();
			handles.push(tokio::spawn(async move { pool.get(CancellationToken::new()).await }));
		}

		tokio::time::sleep(Duration::from_millis(20)).await;
		pool.stop().await;

		for h in handles {
			let res = tokio::time::timeout(Duration::from_millis(200), h)
				.await
				.expect("waiter task should finish promptly after shutdown")
				.unwrap();
			assert!(matches!(res, Err(GetError::Cancelled)));
		}
	}
}
