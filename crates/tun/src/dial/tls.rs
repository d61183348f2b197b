//! TLS dialer: `PlainDialer` plus a `tokio-rustls` client handshake.
//!
//! Grounded in `original_source/connfactory.go` and `tlsfactory.go`: client
//! certificate + key pairing, a custom CA file falling back to the system
//! trust store, optional hostname-check bypass that still validates the
//! chain (only name matching is skipped, mirroring the Go `VerifyPeerCertificate`
//! override), SNI override via `tls_servername`, and session-ticket
//! resumption.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tun_pool::{DialError, Dialer};

use crate::config::TlsConfig;
use crate::dial::plain::PlainDialer;

pub static ALL_TLS_VERSIONS: &[&rustls::SupportedProtocolVersion] =
	&[&rustls::version::TLS12, &rustls::version::TLS13];

pub struct TlsDialer {
	inner: PlainDialer,
	servername: ServerName<'static>,
	client_config: Arc<ClientConfig>,
}

impl TlsDialer {
	pub fn new(inner: PlainDialer, dsthost: &str, tls: &TlsConfig) -> anyhow::Result<Self> {
		let mut roots = RootCertStore::empty();
		if let Some(cafile) = &tls.cafile {
			let pem = std::fs::read(cafile)?;
			let mut reader = std::io::BufReader::new(Cursor::new(pem));
			let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
			let (added, _skipped) = roots.add_parsable_certificates(certs);
			if added == 0 {
				anyhow::bail!("failed to load CA certificates from {cafile:?}");
			}
		} else {
			for cert in rustls_native_certs::load_native_certs().certs {
				roots.add(cert)?;
			}
		}
		let roots = Arc::new(roots);

		let builder = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
			.with_protocol_versions(ALL_TLS_VERSIONS)
			.expect("protocol version list is valid")
			.with_root_certificates(roots.clone());

		let mut client_config = match (&tls.cert, &tls.key) {
			(Some(cert), Some(key)) => {
				let cert_chain = load_cert_chain(cert)?;
				let private_key = load_private_key(key)?;
				builder.with_client_auth_cert(cert_chain, private_key)?
			}
			_ => builder.with_no_client_auth(),
		};

		client_config.resumption = if tls.session_cache {
			rustls::client::Resumption::in_memory_sessions(256)
		} else {
			rustls::client::Resumption::disabled()
		};

		if !tls.hostname_check {
			let inner_verifier = rustls::client::WebPkiServerVerifier::builder(roots).build()?;
			client_config
				.dangerous()
				.set_certificate_verifier(Arc::new(insecure::NoServerNameVerification::new(inner_verifier)));
		}

		let name = tls.servername.clone().unwrap_or_else(|| dsthost.to_string());
		let servername = ServerName::try_from(name.clone())
			.map_err(|_| anyhow::anyhow!("{name:?} is not a valid TLS server name"))?
			.to_owned();

		Ok(Self {
			inner,
			servername,
			client_config: Arc::new(client_config),
		})
	}
}

fn load_cert_chain(path: &std::path::Path) -> anyhow::Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
	let pem = std::fs::read(path)?;
	let mut reader = std::io::BufReader::new(Cursor::new(pem));
	Ok(rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?)
}

fn load_private_key(path: &std::path::Path) -> anyhow::Result<rustls::pki_types::PrivateKeyDer<'static>> {
	let pem = std::fs::read(path)?;
	let mut reader = std::io::BufReader::new(Cursor::new(pem));
	rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| anyhow::anyhow!("no private key found in {path:?}"))
}

#[async_trait]
impl Dialer for TlsDialer {
	type Stream = TlsStream<<PlainDialer as Dialer>::Stream>;

	async fn dial(&self, cancel: CancellationToken) -> Result<Self::Stream, DialError> {
		let tcp = self.inner.dial(cancel.clone()).await?;
		let connector = TlsConnector::from(self.client_config.clone());
		let handshake = connector.connect(self.servername.clone(), tcp);
		tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(DialError::Cancelled),
			res = handshake => res.map_err(|e| DialError::Tls(e.to_string())),
		}
	}
}

/// A certificate verifier that validates the full chain but never checks
/// that the presented name matches the connection's server name, mirroring
/// `connfactory.go`'s `VerifyPeerCertificate` override.
mod insecure {
	use std::sync::Arc;

	use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
	use rustls::client::WebPkiServerVerifier;
	use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
	use rustls::{CertificateError, DigitallySignedStruct, Error, SignatureScheme};

	#[derive(Debug)]
	pub struct NoServerNameVerification {
		inner: Arc<WebPkiServerVerifier>,
	}

	impl NoServerNameVerification {
		pub fn new(inner: Arc<WebPkiServerVerifier>) -> Self {
			Self { inner }
		}
	}

	impl ServerCertVerifier for NoServerNameVerification {
		fn verify_server_cert(
			&self,
			end_entity: &CertificateDer<'_>,
			intermediates: &[CertificateDer<'_>],
			server_name: &ServerName<'_>,
			ocsp_response: &[u8],
			now: UnixTime,
		) -> Result<ServerCertVerified, Error> {
			match self
				.inner
				.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
			{
				Ok(verified) => Ok(verified),
				Err(Error::InvalidCertificate(cert_error))
					if matches!(
						cert_error,
						CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
					) =>
				{
					Ok(ServerCertVerified::assertion())
				}
				Err(e) => Err(e),
			}
		}

		fn verify_tls12_signature(
			&self,
			message: &[u8],
			cert: &CertificateDer<'_>,
			dss: &DigitallySignedStruct,
		) -> Result<HandshakeSignatureValid, Error> {
			self.inner.verify_tls12_signature(message, cert, dss)
		}

		fn verify_tls13_signature(
			&self,
			message: &[u8],
			cert: &CertificateDer<'_>,
			dss: &DigitallySignedStruct,
		) -> Result<HandshakeSignatureValid, Error> {
			self.inner.verify_tls13_signature(message, cert, dss)
		}

		fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
			self.inner.supported_verify_schemes()
		}
	}
}
