//! Per-accepted-client handling: acquire a warm upstream stream and splice.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tun_core::copy::{copy_bidirectional, CopyStats};

use crate::dial::Dialer;
use crate::pool::ConnPool;

#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
	/// Bound on how long to wait for a warm connection from the pool.
	pub pool_wait: Duration,
}

/// Handles one accepted client stream to completion: waits for a warm
/// upstream connection (bounded by `pool_wait`), splices bytes in both
/// directions until either side closes, and logs the outcome.
pub async fn handle_client<D, C>(
	client: C,
	pool: &ConnPool<D>,
	config: HandlerConfig,
	cancel: CancellationToken,
) where
	D: Dialer,
	C: AsyncRead + AsyncWrite + Unpin,
{
	let upstream = tokio::select! {
		_ = wallclock_timeout(config.pool_wait) => {
			warn!("timed out waiting for a pool connection");
			return;
		}
		res = pool.get(cancel.clone()) => match res {
			Ok(stream) => stream,
			Err(_) => {
				if !cancel.is_cancelled() {
					error!("error retrieving connection from pool");
				}
				return;
			}
		},
	};

	let stats = CopyStats::default();
	tokio::select! {
		_ = cancel.cancelled() => {
			// Dropping the still-owned client and upstream streams (they
			// were moved into the losing branch's future) closes both
			// sockets, which is what unblocks a splice waiting on shutdown.
		}
		res = copy_bidirectional(client, upstream, &stats) => {
			match res {
				Ok((sent, received)) => {
					info!(sent, received, "connection closed");
				}
				Err(e) => {
					info!(error = %e, "connection closed with error");
				}
			}
			return;
		}
	}
}

async fn wallclock_timeout(d: Duration) {
	crate::wallclock::sleep(d).await
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;
	use tokio::io::DuplexStream;

	use super::*;
	use crate::dial::DialError;
	use crate::pool::PoolConfig;

	/// Never produces a stream; only resolves once cancelled. Keeps the
	/// pool permanently empty so `handle_client` has no choice but to hit
	/// its `pool_wait` timeout branch.
	struct NeverDialer;

	#[async_trait]
	impl Dialer for NeverDialer {
		type Stream = DuplexStream;

		async fn dial(&self, cancel: CancellationToken) -> Result<Self::Stream, DialError> {
			cancel.cancelled().await;
			Err(DialError::Cancelled)
		}
	}

	#[tokio::test]
	async fn pool_wait_timeout_returns_without_splicing() {
		let pool = ConnPool::new(
			NeverDialer,
			PoolConfig {
				size: 1,
				ttl: Duration::from_secs(30),
				backoff: Duration::from_millis(10),
			},
		);
		pool.start().await;

		let (client, _client_remote) = tokio::io::duplex(64);
		let config = HandlerConfig {
			pool_wait: Duration::from_millis(20),
		};

		// If the guard in handle_client's first select! arm were missing,
		// this would hang past the outer timeout instead of returning on
		// its own once pool_wait elapses.
		tokio::time::timeout(
			Duration::from_millis(200),
			handle_client(client, &pool, config, CancellationToken::new()),
		)
		.await
		.expect("handle_client should return once pool_wait elapses, not hang waiting on the pool");

		pool.stop().await;
	}
}
