//! Validated configuration, built from [`crate::cli::Args`].
//!
//! Cross-field rules mirror `connfactory.go`/`tlsfactory.go`: a hostname
//! check may only be disabled in the presence of a custom CA file, and a
//! client certificate and key must be specified together.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Args;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error("destination port must not be 0")]
	BadDestinationPort,
	#[error("bind address {0:?} does not parse as an IP address")]
	BadBindAddress(String),
	#[error("dialers parameter should be not less than 1")]
	TooFewDialers,
	#[error("certificate file and key file must be specified only together")]
	MismatchedCertAndKey,
	#[error("hostname check should not be disabled in absence of a custom CA file")]
	HostnameCheckDisabledWithoutCa,
	#[error("invalid duration for --{flag}: {source}")]
	BadDuration { flag: &'static str, source: String },
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
	pub cert: Option<PathBuf>,
	pub key: Option<PathBuf>,
	pub cafile: Option<PathBuf>,
	pub hostname_check: bool,
	pub servername: Option<String>,
	pub session_cache: bool,
}

#[derive(Debug, Clone)]
pub struct DnsConfig {
	pub cache_ttl: Duration,
	pub neg_cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
	pub dsthost: String,
	pub dstport: u16,
	pub verbosity: i64,
	pub bind_address: IpAddr,
	pub bind_port: u16,
	pub pool_size: usize,
	pub dialers: usize,
	pub backoff: Duration,
	pub ttl: Duration,
	pub timeout: Duration,
	pub pool_wait: Duration,
	pub tls: Option<TlsConfig>,
	pub dns: DnsConfig,
}

fn duration(flag: &'static str, raw: &str) -> Result<Duration, ConfigError> {
	duration_str::parse(raw).map_err(|source| ConfigError::BadDuration {
		flag,
		source: source.to_string(),
	})
}

impl TryFrom<Args> for Config {
	type Error = ConfigError;

	fn try_from(args: Args) -> Result<Self, ConfigError> {
		if args.dstport == 0 {
			return Err(ConfigError::BadDestinationPort);
		}
		let bind_address = args
			.bind_address
			.parse::<IpAddr>()
			.map_err(|_| ConfigError::BadBindAddress(args.bind_address.clone()))?;

		let dialers = args.dialers.unwrap_or_else(|| 4 * num_cpus::get());
		if dialers < 1 {
			return Err(ConfigError::TooFewDialers);
		}

		if args.cert.is_some() != args.key.is_some() {
			return Err(ConfigError::MismatchedCertAndKey);
		}
		if !args.hostname_check && args.cafile.is_none() {
			return Err(ConfigError::HostnameCheckDisabledWithoutCa);
		}

		let tls = args.tls_enabled.then(|| TlsConfig {
			cert: args.cert.clone(),
			key: args.key.clone(),
			cafile: args.cafile.clone(),
			hostname_check: args.hostname_check,
			servername: args.tls_servername.clone(),
			session_cache: args.tls_session_cache,
		});

		Ok(Config {
			dsthost: args.dsthost,
			dstport: args.dstport,
			verbosity: args.verbosity,
			bind_address,
			bind_port: args.bind_port,
			pool_size: args.pool_size,
			dialers,
			backoff: duration("backoff", &args.backoff)?,
			ttl: duration("ttl", &args.ttl)?,
			timeout: duration("timeout", &args.timeout)?,
			pool_wait: duration("pool-wait", &args.pool_wait)?,
			tls,
			dns: DnsConfig {
				cache_ttl: duration("dns-cache-ttl", &args.dns_cache_ttl)?,
				neg_cache_ttl: duration("dns-neg-cache-ttl", &args.dns_neg_cache_ttl)?,
			},
		})
	}
}
