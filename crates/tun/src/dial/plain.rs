//! Bare TCP dialer, bounded by a semaphore sized by `dialers`.
//!
//! Grounded in `original_source/connfactory.go`'s `DialContext` (dial races
//! context cancellation) and `tlsfactory.go`'s `semaphore.Weighted` bound.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tun_pool::{DialError, Dialer};

use crate::dns::DnsResolver;

pub struct PlainDialer {
	host: String,
	port: u16,
	timeout: Duration,
	dns: Arc<DnsResolver>,
	sem: Arc<Semaphore>,
}

impl PlainDialer {
	pub fn new(host: String, port: u16, timeout: Duration, dialers: usize, dns: Arc<DnsResolver>) -> Self {
		Self {
			host,
			port,
			timeout,
			dns,
			sem: Arc::new(Semaphore::new(dialers)),
		}
	}

	async fn connect_one(&self, addr: IpAddr, cancel: &CancellationToken) -> Result<TcpStream, DialError> {
		let connect = TcpStream::connect((addr, self.port));
		let stream = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(DialError::Cancelled),
			res = tokio::time::timeout(self.timeout, connect) => {
				res.map_err(|_| DialError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")))??
			}
		};
		stream.set_nodelay(true)?;
		Ok(stream)
	}
}

#[async_trait]
impl Dialer for PlainDialer {
	type Stream = TcpStream;

	async fn dial(&self, cancel: CancellationToken) -> Result<TcpStream, DialError> {
		let _permit = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(DialError::Cancelled),
			permit = self.sem.acquire() => permit.expect("semaphore is never closed"),
		};

		let addrs = self.dns.resolve(&self.host).await?;
		let mut last_err = None;
		for addr in addrs {
			match self.connect_one(addr, &cancel).await {
				Ok(stream) => return Ok(stream),
				Err(DialError::Cancelled) => return Err(DialError::Cancelled),
				Err(e) => {
					debug!(%addr, error = %e, "dial attempt failed, trying next address");
					last_err = Some(e);
				}
			}
		}
		Err(last_err.unwrap_or_else(|| DialError::Dns(format!("no addresses for {}", self.host))))
	}
}
