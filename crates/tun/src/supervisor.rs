//! Accept loop: binds the local listener, hands each accepted stream to
//! [`tun_pool::handle_client`], and participates in graceful drain.
//!
//! Grounded in `original_source/listener.go`'s `TCPListener` (accept loop,
//! quit-channel shutdown) and the teacher's `proxy::gateway::Gateway::run_bind`
//! (drain-aware accept loop racing `listener.accept()` against a drain
//! watch, `force_shutdown` aborting connections past the grace deadline).
//! Multi-bind/thread-per-core machinery in the teacher is not warranted
//! here: this tunnel serves exactly one fixed listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tun_core::drain::DrainWatcher;
use tun_pool::{handle_client, Dialer, HandlerConfig};

pub async fn run<D: Dialer>(
	bind_addr: SocketAddr,
	pool: Arc<tun_pool::ConnPool<D>>,
	handler_config: HandlerConfig,
	drain_deadline: Duration,
	drain: DrainWatcher,
) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind_addr)
		.await
		.with_context(|| format!("binding listener on {bind_addr}"))?;
	info!(%bind_addr, "listener started");

	let accept = |drain: DrainWatcher, force_shutdown: tokio::sync::watch::Receiver<()>| async move {
		let wait = drain.clone().wait_for_drain();
		tokio::pin!(wait);
		loop {
			tokio::select! {
				accepted = listener.accept() => {
					match accepted {
						Ok((stream, peer)) => {
							debug!(%peer, "accepted connection");
							// Holding a clone of the drain watcher alive for the
							// lifetime of this task is what keeps the supervisor's
							// drain from completing until every in-flight
							// connection has finished.
							let blocker = drain.clone();
							let pool = pool.clone();
							let cancel = CancellationToken::new();
							let mut force_shutdown = force_shutdown.clone();
							tokio::spawn(async move {
								let _blocker = blocker;
								tokio::select! {
									_ = force_shutdown.changed() => {
										cancel.cancel();
										warn!(%peer, "connection forcefully terminated at drain deadline");
									}
									_ = handle_client(stream, &pool, handler_config, cancel.clone()) => {}
								}
							});
						}
						Err(e) => {
							warn!(error = %e, "accept error");
						}
					}
				}
				_ = &mut wait => {
					info!("drain started, no longer accepting new connections");
					return;
				}
			}
		}
	};

	tun_core::drain::run_with_drain("listener".to_string(), drain, drain_deadline, accept).await;
	Ok(())
}
