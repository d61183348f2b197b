//! A warm connection paired with its background liveness probe.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Why the probe read returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
	/// The consumer claimed the connection and cancelled the probe cleanly.
	Cancelled,
	/// The peer sent data, closed, or reset the connection while it was idle.
	Disrupted,
}

/// A dialed stream under supervision by a background one-byte probe read.
///
/// As long as [`cancel_watch`](Self::cancel_watch) has not been called and
/// [`await_done`](Self::await_done) has not resolved, the stream is
/// considered live. A consumer MUST call `cancel_watch` and then
/// `await_done` before issuing any application read, which drains the
/// probe cleanly and hands back sole ownership of the stream.
pub struct WatchedConn<S> {
	stream: Arc<Mutex<S>>,
	cancel: CancellationToken,
	done: watch::Receiver<Option<ProbeOutcome>>,
}

impl<S> WatchedConn<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	/// Stops the background probe read.
	pub fn cancel_watch(&self) {
		self.cancel.cancel();
	}

	/// A clone of the cancellation handle, usable by a party other than the
	/// consumer (the pool worker) to also force the probe to stop.
	pub fn cancel_handle(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// A clone of the completion watch, usable by a party other than the
	/// consumer to independently learn when the probe has returned.
	pub fn done_handle(&self) -> watch::Receiver<Option<ProbeOutcome>> {
		self.done.clone()
	}

	/// Waits for the probe read task to return, after it has observed
	/// either the cancellation or real peer activity.
	pub async fn await_done(&mut self) -> ProbeOutcome {
		self.done
			.wait_for(Option::is_some)
			.await
			.ok()
			.and_then(|guard| *guard)
			.unwrap_or(ProbeOutcome::Disrupted)
	}

	/// Unwraps the stream for exclusive use. Panics if called before
	/// `await_done` has resolved, since the probe task may still hold a
	/// clone of the shared handle until then.
	pub fn into_stream(self) -> S {
		match Arc::try_unwrap(self.stream) {
			Ok(mutex) => mutex.into_inner(),
			Err(_) => unreachable!("into_stream called before await_done resolved"),
		}
	}
}

/// Spawns the background probe read and returns the armed [`WatchedConn`].
pub fn arm_watcher<S>(stream: S) -> WatchedConn<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	let stream = Arc::new(Mutex::new(stream));
	let cancel = CancellationToken::new();
	let (done_tx, done_rx) = watch::channel(None);

	let task_stream = stream.clone();
	let task_cancel = cancel.clone();
	tokio::spawn(async move {
		let outcome = {
			let mut guard = task_stream.lock().await;
			let mut probe = [0u8; 1];
			tokio::select! {
				_ = task_cancel.cancelled() => ProbeOutcome::Cancelled,
				res = guard.read(&mut probe) => match res {
					Ok(_) | Err(_) => ProbeOutcome::Disrupted,
				},
			}
		};
		// Drop our clone before signalling completion, so a consumer's
		// subsequent `into_stream` finds the Arc uniquely owned.
		drop(task_stream);
		let _ = done_tx.send(Some(outcome));
	});

	WatchedConn {
		stream,
		cancel,
		done: done_rx,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn cancel_watch_yields_cancelled_outcome_and_clean_handoff() {
		let (stream, _peer) = tokio::io::duplex(16);
		let mut watched = arm_watcher(stream);

		watched.cancel_watch();
		let outcome = watched.await_done().await;
		assert_eq!(outcome, ProbeOutcome::Cancelled);

		let _stream = watched.into_stream();
	}

	#[tokio::test]
	async fn peer_close_yields_disrupted_outcome() {
		let (stream, peer) = tokio::io::duplex(16);
		let mut watched = arm_watcher(stream);

		drop(peer);

		let outcome = watched.await_done().await;
		assert_eq!(outcome, ProbeOutcome::Disrupted);
	}

	#[tokio::test]
	async fn worker_side_handle_observes_completion_independently() {
		let (stream, _peer) = tokio::io::duplex(16);
		let watched = arm_watcher(stream);
		let mut worker_view = watched.done_handle();

		watched.cancel_watch();
		worker_view.changed().await.unwrap();
		assert_eq!(*worker_view.borrow(), Some(ProbeOutcome::Cancelled));
	}
}
