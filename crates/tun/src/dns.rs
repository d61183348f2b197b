//! TTL'd DNS resolution in front of the dialer.
//!
//! Restores `original_source/dnscache/wrapper.go`'s caching resolver: a
//! plain `net.DefaultResolver` wrapped by an LRU+TTL cache, consulted once
//! per dial and returning every address on file so the caller can try each
//! in turn. `hickory-resolver`'s own `TokioResolver` already carries a
//! positive/negative answer cache, so no extra cache layer is needed here.

use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;

use tun_pool::DialError;

pub struct DnsResolver {
	inner: TokioResolver,
}

impl DnsResolver {
	/// `cache_ttl` bounds how long a positive answer is reused; `neg_cache_ttl`
	/// bounds how long a failed lookup (NXDOMAIN, timeout) is reused.
	pub fn new(cache_ttl: Duration, neg_cache_ttl: Duration) -> Self {
		let mut opts = ResolverOpts::default();
		opts.positive_max_ttl = Some(cache_ttl);
		opts.negative_max_ttl = Some(neg_cache_ttl);
		let inner =
			TokioResolver::builder_with_config(ResolverConfig::default(), TokioConnectionProvider::default())
				.with_options(opts)
				.build();
		Self { inner }
	}

	/// Resolves `host` to every address on file. A literal IP is returned
	/// as a single-element list without touching the resolver.
	pub async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, DialError> {
		if let Ok(ip) = host.parse::<IpAddr>() {
			return Ok(vec![ip]);
		}
		let lookup = self
			.inner
			.lookup_ip(host)
			.await
			.map_err(|e| DialError::Dns(e.to_string()))?;
		let addrs: Vec<IpAddr> = lookup.iter().collect();
		if addrs.is_empty() {
			return Err(DialError::Dns(format!("no addresses found for {host}")));
		}
		Ok(addrs)
	}
}
