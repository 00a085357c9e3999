//! HTTP and HTTPS listeners
//!
//! The control-plane router is served plain on `http.listen` and/or behind
//! rustls on `https.listen`. Certificates are externally provisioned PEM
//! files.

use std::convert::Infallible;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::Service;
use tracing::{debug, info, warn};

/// Certificate/key pair handed to the HTTPS listener
#[derive(Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsConfig {
    pub fn new(cert_path: &Path, key_path: &Path) -> Self {
        Self {
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
        }
    }

    /// Load the PEM pair into a rustls server configuration
    pub fn load(&self) -> Result<ServerConfig> {
        let cert_file = File::open(&self.cert_path).map_err(|e| {
            anyhow!(
                "failed to open certificate file {}: {}",
                self.cert_path.display(),
                e
            )
        })?;
        let mut cert_reader = BufReader::new(cert_file);
        let certs: Vec<CertificateDer<'static>> =
            certs(&mut cert_reader).filter_map(|r| r.ok()).collect();
        if certs.is_empty() {
            return Err(anyhow!(
                "no certificates found in {}",
                self.cert_path.display()
            ));
        }

        let key_file = File::open(&self.key_path).map_err(|e| {
            anyhow!("failed to open key file {}: {}", self.key_path.display(), e)
        })?;
        let mut key_reader = BufReader::new(key_file);
        let key = private_key(&mut key_reader)
            .map_err(|e| anyhow!("failed to parse private key: {}", e))?
            .ok_or_else(|| anyhow!("no private key found in {}", self.key_path.display()))?;

        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| anyhow!("failed to build TLS config: {}", e))
    }
}

/// Serve the router over plain HTTP
pub async fn serve_http(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow!("failed to bind HTTP listener to {}: {}", addr, e))?;
    info!("HTTP listener bound to {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Serve the router over HTTPS
pub async fn serve_https(addr: SocketAddr, app: Router, tls: TlsConfig) -> Result<()> {
    let config = tls.load()?;
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow!("failed to bind HTTPS listener to {}: {}", addr, e))?;
    info!("HTTPS listener bound to {}", addr);

    let mut make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("error accepting HTTPS connection: {}", e);
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let tower_service = unwrap_infallible(make_service.call(remote).await);

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    debug!("TLS handshake failed with {}: {}", remote, e);
                    return;
                }
            };

            let hyper_service = TowerToHyperService::new(tower_service);
            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(tls_stream), hyper_service)
                .await
            {
                debug!("error serving HTTPS connection from {}: {}", remote, e);
            }
        });
    }
}

fn unwrap_infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}
