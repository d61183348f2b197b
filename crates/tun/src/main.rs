mod cli;
mod config;
mod dial;
mod dns;
mod supervisor;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tun_pool::{ConnPool, Dialer, HandlerConfig, PoolConfig};

use crate::cli::Args;
use crate::config::Config;
use crate::dial::{PlainDialer, TlsDialer};
use crate::dns::DnsResolver;

/// How long the supervisor waits for in-flight connections to finish
/// their splice once a shutdown signal arrives, before force-closing them.
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	let config = match Config::try_from(args) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("\n{e}\n");
			std::process::exit(2);
		}
	};

	let _log_guard = tun_core::logging::init(config.verbosity);

	tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()?
		.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
	let dns = Arc::new(DnsResolver::new(config.dns.cache_ttl, config.dns.neg_cache_ttl));
	let plain = PlainDialer::new(
		config.dsthost.clone(),
		config.dstport,
		config.timeout,
		config.dialers,
		dns,
	);

	match &config.tls {
		Some(tls) => {
			let dialer = TlsDialer::new(plain, &config.dsthost, tls)?;
			serve(config, dialer).await
		}
		None => serve(config, plain).await,
	}
}

async fn serve<D: Dialer>(config: Config, dialer: D) -> anyhow::Result<()> {
	let pool = ConnPool::new(
		dialer,
		PoolConfig {
			size: config.pool_size,
			ttl: config.ttl,
			backoff: config.backoff,
		},
	);
	pool.start().await;

	let (drain_trigger, drain_watcher) = tun_core::drain::new();
	let bind_addr = SocketAddr::new(config.bind_address, config.bind_port);
	let handler_config = HandlerConfig {
		pool_wait: config.pool_wait,
	};

	let supervisor = tokio::spawn(supervisor::run(
		bind_addr,
		pool.clone(),
		handler_config,
		DRAIN_DEADLINE,
		drain_watcher,
	));

	let shutdown = tun_core::signal::Shutdown::new();
	shutdown.wait().await;
	info!("shutting down");

	drain_trigger
		.start_drain_and_wait(tun_core::drain::DrainMode::Graceful)
		.await;
	supervisor.await??;
	pool.stop().await;
	Ok(())
}
