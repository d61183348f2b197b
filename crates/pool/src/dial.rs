//! The dial factory contract. Concrete dialers (plain TCP, TLS with
//! client-auth / custom CA / SNI override, DNS-cached) live outside this
//! crate; the pool only depends on this trait.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum DialError {
	#[error("dial cancelled")]
	Cancelled,
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("tls handshake failed: {0}")]
	Tls(String),
	#[error("dns resolution failed: {0}")]
	Dns(String),
}

/// Bounded concurrency on dials (typically a `Semaphore` sized by a
/// `dialers` setting) is the implementation's own responsibility, not the
/// pool's.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
	type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

	async fn dial(&self, cancel: CancellationToken) -> Result<Self::Stream, DialError>;
}
