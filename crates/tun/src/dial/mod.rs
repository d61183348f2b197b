//! Concrete [`tun_pool::Dialer`] implementations: plain TCP and TLS, both
//! bounded by a semaphore and backed by a shared [`crate::dns::DnsResolver`].

pub mod plain;
pub mod tls;

pub use tun_pool::DialError;
pub use plain::PlainDialer;
pub use tls::TlsDialer;
