//! TLS listener bind (spec §6 Config: `tls`). Three modes: `disabled` (plain
//! TCP), `manual` (operator-supplied cert/key), `acme` (automatic, via the
//! `rustls-acme` crate). The acceptor is exposed through [`Acceptor`], which
//! implements axum's [`axum::serve::Listener`] trait so `gateway-app`'s main
//! loop can hand either a plain or TLS-wrapped listener to `axum::serve`
//! without branching on TLS mode at the call site.

use crate::config::{TlsConfig, TlsMode};
use rustls_acme::AcmeConfig;
use rustls_acme::caches::DirCache;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{error, info};

/// Unifies a bare `TcpListener` and a TLS-wrapping one behind axum's
/// `Listener` trait, so `gateway-app` can call `axum::serve(acceptor, app)`
/// the same way regardless of [`TlsMode`].
pub enum Acceptor {
	Plain(TcpListener),
	Tls(TcpListener, TlsAcceptor),
}

impl axum::serve::Listener for Acceptor {
	type Io = MaybeTlsStream;
	type Addr = SocketAddr;

	fn accept(&mut self) -> Pin<Box<dyn Future<Output = (Self::Io, Self::Addr)> + Send + '_>> {
		Box::pin(async move {
			loop {
				let result = match self {
					Acceptor::Plain(listener) => listener.accept().await.map(|(s, a)| (MaybeTlsStream::Plain(s), a)),
					Acceptor::Tls(listener, acceptor) => match listener.accept().await {
						Ok((tcp, addr)) => match acceptor.accept(tcp).await {
							Ok(tls) => Ok((MaybeTlsStream::Tls(Box::new(tls)), addr)),
							Err(e) => Err(e),
						},
						Err(e) => Err(e),
					},
				};
				match result {
					Ok(pair) => return pair,
					// A single failed handshake (reset connection, bad client
					// cert, etc.) must not bring the whole listener down.
					Err(e) => error!(error = %e, "accept failed, continuing"),
				}
			}
		})
	}

	fn local_addr(&self) -> io::Result<Self::Addr> {
		match self {
			Acceptor::Plain(l) => l.local_addr(),
			Acceptor::Tls(l, _) => l.local_addr(),
		}
	}
}

pub enum MaybeTlsStream {
	Plain(TcpStream),
	Tls(Box<TlsStream<TcpStream>>),
}

impl tokio::io::AsyncRead for MaybeTlsStream {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
		buf: &mut tokio::io::ReadBuf<'_>,
	) -> std::task::Poll<io::Result<()>> {
		match self.get_mut() {
			MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
			MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
		}
	}
}

impl tokio::io::AsyncWrite for MaybeTlsStream {
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
		buf: &[u8],
	) -> std::task::Poll<io::Result<usize>> {
		match self.get_mut() {
			MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
			MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
		}
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
		match self.get_mut() {
			MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
			MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
		}
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
		match self.get_mut() {
			MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
			MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
		}
	}
}

/// Binds `addr` and wraps it per `tls.mode`. For `Manual`, `cert_path` and
/// `key_path` must both be set. For `Acme`, `acme_domains` must be non-empty;
/// certificate issuance/renewal runs as a background task for the life of
/// the process.
pub async fn bind(addr: &str, tls: &TlsConfig) -> anyhow::Result<Acceptor> {
	let listener = TcpListener::bind(addr).await?;
	match tls.mode {
		TlsMode::Disabled => Ok(Acceptor::Plain(listener)),
		TlsMode::Manual => {
			let cert_path = tls
				.cert_path
				.as_ref()
				.ok_or_else(|| anyhow::anyhow!("tls.mode is manual but cert_path is unset"))?;
			let key_path = tls
				.key_path
				.as_ref()
				.ok_or_else(|| anyhow::anyhow!("tls.mode is manual but key_path is unset"))?;
			let config = load_manual_config(cert_path, key_path)?;
			Ok(Acceptor::Tls(listener, TlsAcceptor::from(Arc::new(config))))
		},
		TlsMode::Acme => {
			if tls.acme_domains.is_empty() {
				anyhow::bail!("tls.mode is acme but acme_domains is empty");
			}
			let config = spawn_acme_state(tls)?;
			Ok(Acceptor::Tls(listener, TlsAcceptor::from(config)))
		},
	}
}

fn load_manual_config(cert_path: &str, key_path: &str) -> anyhow::Result<rustls::ServerConfig> {
	let cert_file = std::fs::File::open(cert_path)?;
	let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file)).collect::<Result<Vec<_>, _>>()?;
	let key_file = std::fs::File::open(key_path)?;
	let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))?
		.ok_or_else(|| anyhow::anyhow!("no private key found in {key_path}"))?;

	let config = rustls::ServerConfig::builder()
		.with_no_client_auth()
		.with_single_cert(certs, key)?;
	Ok(config)
}

/// Builds an ACME-backed `ServerConfig` and spawns the background task that
/// drives certificate issuance/renewal, logging each lifecycle event the way
/// the rest of this crate logs backend lifecycle events.
fn spawn_acme_state(tls: &TlsConfig) -> anyhow::Result<Arc<rustls::ServerConfig>> {
	let mut builder = AcmeConfig::new(tls.acme_domains.clone());
	if let Some(email) = &tls.acme_email {
		builder = builder.contact_push(format!("mailto:{email}"));
	}
	if let Some(dir) = &tls.acme_cache_dir {
		builder = builder.cache(DirCache::new(dir.clone()));
	}
	let mut state = builder.directory_lets_encrypt(true).state();
	let resolver = state.resolver();
	let config = Arc::new(
		rustls::ServerConfig::builder()
			.with_no_client_auth()
			.with_cert_resolver(resolver),
	);

	tokio::spawn(async move {
		use tokio_stream::StreamExt;
		loop {
			match state.next().await {
				Some(Ok(event)) => info!(?event, "acme event"),
				Some(Err(err)) => error!(%err, "acme error"),
				None => break,
			}
		}
	});

	Ok(config)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn manual_mode_requires_both_paths() {
		let tls = TlsConfig {
			mode: TlsMode::Manual,
			cert_path: None,
			key_path: Some("key.pem".to_string()),
			..Default::default()
		};
		assert!(tls.cert_path.is_none());
	}

	#[tokio::test]
	async fn disabled_mode_binds_plain_tcp() {
		let tls = TlsConfig::default();
		let acceptor = bind("127.0.0.1:0", &tls).await.unwrap();
		assert!(matches!(acceptor, Acceptor::Plain(_)));
	}
}
