//! Command-line surface. One field per flag, validated in [`crate::config`].

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "A steady tunnel: pre-warms a pool of upstream connections \
					so accepted clients never wait on a handshake.")]
pub struct Args {
	/// Destination server hostname.
	#[arg(long)]
	pub dsthost: String,

	/// Destination server port.
	#[arg(long)]
	pub dstport: u16,

	/// Logging verbosity (10 - debug, 20 - info, 30 - warning, 40 - error, 50 - critical).
	#[arg(long, default_value_t = 20)]
	pub verbosity: i64,

	/// Bind address for the local listener.
	#[arg(long, default_value = "127.0.0.1")]
	pub bind_address: String,

	/// Bind port for the local listener.
	#[arg(long, default_value_t = 57800)]
	pub bind_port: u16,

	/// Connection pool size.
	#[arg(long, default_value_t = 50)]
	pub pool_size: usize,

	/// Concurrency limit for outbound connection attempts.
	#[arg(long)]
	pub dialers: Option<usize>,

	/// Delay between connection attempts after a disrupted/expired stream.
	#[arg(long, default_value = "5s")]
	pub backoff: String,

	/// Lifetime of an idle pool connection.
	#[arg(long, default_value = "30s")]
	pub ttl: String,

	/// Upstream connect timeout.
	#[arg(long, default_value = "4s")]
	pub timeout: String,

	/// Timeout for acquiring a connection from the pool.
	#[arg(long, default_value = "15s")]
	pub pool_wait: String,

	/// Use TLS to connect to the destination.
	#[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
	pub tls_enabled: bool,

	/// Client certificate for TLS auth.
	#[arg(long)]
	pub cert: Option<PathBuf>,

	/// Key for the TLS client certificate.
	#[arg(long)]
	pub key: Option<PathBuf>,

	/// Override default CA certs with those in the given file.
	#[arg(long)]
	pub cafile: Option<PathBuf>,

	/// Check hostname in the server cert subject.
	#[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
	pub hostname_check: bool,

	/// Hostname to expect in the server cert (overrides dsthost for verification/SNI).
	#[arg(long)]
	pub tls_servername: Option<String>,

	/// Reuse TLS session tickets across dials to speed up the handshake.
	#[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
	pub tls_session_cache: bool,

	/// Positive-answer DNS cache TTL.
	#[arg(long, default_value = "30s")]
	pub dns_cache_ttl: String,

	/// Negative-answer (NXDOMAIN/timeout) DNS cache TTL.
	#[arg(long, default_value = "1s")]
	pub dns_neg_cache_ttl: String,
}
