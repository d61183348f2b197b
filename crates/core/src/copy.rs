//! Bidirectional byte-stream splicing.
//!
//! This is the "proxy" step of the client handler: once a client stream and
//! a warm upstream stream are both in hand, copy bytes in both directions
//! until either side closes. Closing the destination half as soon as a copy
//! direction finishes is the trick that unblocks the other direction's read
//! with an error, guaranteeing both halves terminate together.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Per-connection byte counters. Cheap to share: both copy directions hold
/// a reference and increment independently.
#[derive(Default, Debug)]
pub struct CopyStats {
	sent: AtomicU64,
	received: AtomicU64,
}

impl CopyStats {
	pub fn sent(&self) -> u64 {
		self.sent.load(Ordering::Relaxed)
	}

	pub fn received(&self) -> u64 {
		self.received.load(Ordering::Relaxed)
	}
}

/// Default per-direction buffer. Tunable; not a correctness property.
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum CopyError {
	#[error("client disconnected before all data was written")]
	ClientDisconnected,
	#[error("destination disconnected before all data was written")]
	BackendDisconnected,
	#[error("io error: {0}")]
	Io(#[from] io::Error),
}

// A copy direction can legitimately end in a reset or a broken pipe once the
// peer has gone away; that is not an operational error worth surfacing.
fn ignore_benign(res: io::Result<u64>) -> io::Result<u64> {
	match &res {
		Err(e)
			if matches!(
				e.kind(),
				io::ErrorKind::NotConnected
					| io::ErrorKind::UnexpectedEof
					| io::ErrorKind::ConnectionReset
					| io::ErrorKind::BrokenPipe
			) =>
		{
			Ok(0)
		}
		_ => res,
	}
}

async fn pump<R, W>(mut r: R, mut w: W, counter: &AtomicU64) -> io::Result<u64>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut buf = vec![0u8; COPY_BUFFER_SIZE];
	let mut total = 0u64;
	loop {
		let n = r.read(&mut buf).await?;
		if n == 0 {
			break;
		}
		w.write_all(&buf[..n]).await?;
		total += n as u64;
		counter.fetch_add(n as u64, Ordering::Relaxed);
	}
	Ok(total)
}

/// Splice `a` and `b` until either side closes. Each direction's destination
/// is shut down as soon as its source hits EOF or errors, which is what
/// causes the opposite direction to unblock.
pub async fn copy_bidirectional<A, B>(
	a: A,
	b: B,
	stats: &CopyStats,
) -> Result<(u64, u64), CopyError>
where
	A: AsyncRead + AsyncWrite + Unpin,
	B: AsyncRead + AsyncWrite + Unpin,
{
	let (mut ar, mut aw) = tokio::io::split(a);
	let (mut br, mut bw) = tokio::io::split(b);

	let a_to_b = async {
		let res = ignore_benign(pump(&mut ar, &mut bw, &stats.sent).await);
		let _ = bw.shutdown().await;
		res.map_err(|e| match e.kind() {
			io::ErrorKind::NotConnected
			| io::ErrorKind::UnexpectedEof
			| io::ErrorKind::ConnectionReset
			| io::ErrorKind::BrokenPipe => CopyError::BackendDisconnected,
			_ => CopyError::Io(e),
		})
	};

	let b_to_a = async {
		let res = ignore_benign(pump(&mut br, &mut aw, &stats.received).await);
		let _ = aw.shutdown().await;
		res.map_err(|e| match e.kind() {
			io::ErrorKind::NotConnected
			| io::ErrorKind::UnexpectedEof
			| io::ErrorKind::ConnectionReset
			| io::ErrorKind::BrokenPipe => CopyError::ClientDisconnected,
			_ => CopyError::Io(e),
		})
	};

	// join, not try_join: let both halves run to completion even if one
	// errors, so neither stream is left half-copied.
	let (sent, received) = tokio::join!(a_to_b, b_to_a);
	Ok((sent?, received?))
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::AsyncReadExt as _;
	use tokio::io::AsyncWriteExt as _;

	#[tokio::test]
	async fn copies_both_directions_and_terminates_on_close() {
		let (client, mut client_remote) = tokio::io::duplex(64);
		let (upstream, mut upstream_remote) = tokio::io::duplex(64);

		let splice = tokio::spawn(async move {
			let stats = CopyStats::default();
			copy_bidirectional(client, upstream, &stats).await
		});

		client_remote.write_all(b"hello").await.unwrap();
		let mut buf = [0u8; 5];
		upstream_remote.read_exact(&mut buf).await.unwrap();
		assert_eq!(&buf, b"hello");

		upstream_remote.write_all(b"world").await.unwrap();
		let mut buf = [0u8; 5];
		client_remote.read_exact(&mut buf).await.unwrap();
		assert_eq!(&buf, b"world");

		// closing one remote end should unblock the splice entirely.
		drop(client_remote);
		drop(upstream_remote);
		splice.await.unwrap().unwrap();
	}
}
