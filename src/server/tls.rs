// ABOUTME: TLS termination for the HTTP server using rustls
// ABOUTME: Loads PEM material from files or memory and serves each connection with hyper
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::sync::Arc;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig as RustlsConfig;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::{TlsConfig, TlsSource};
use crate::errors::ServeError;

fn tls_error(context: &str, error: impl std::fmt::Display) -> ServeError {
    ServeError::Tls(format!("{context}: {error}"))
}

fn load_material(
    source: &TlsSource,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ServeError> {
    let (certs, key) = match source {
        TlsSource::Files { cert, key } => {
            let certs = CertificateDer::pem_file_iter(cert)
                .map_err(|e| tls_error("failed to open certificate file", e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| tls_error("invalid certificate file", e))?;
            let key = PrivateKeyDer::from_pem_file(key)
                .map_err(|e| tls_error("invalid private key file", e))?;
            (certs, key)
        }
        TlsSource::Pem { cert, key } => {
            let certs = CertificateDer::pem_slice_iter(cert.as_bytes())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| tls_error("invalid certificate PEM", e))?;
            let key = PrivateKeyDer::from_pem_slice(key.as_bytes())
                .map_err(|e| tls_error("invalid private key PEM", e))?;
            (certs, key)
        }
    };
    if certs.is_empty() {
        return Err(ServeError::Tls("no certificate found".to_owned()));
    }
    Ok((certs, key))
}

/// Build the rustls server configuration advertising HTTP/2 and HTTP/1.1
pub(crate) fn server_config(tls: &TlsConfig) -> Result<Arc<RustlsConfig>, ServeError> {
    let (certs, key) = load_material(&tls.source)?;
    let mut config =
        RustlsConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_error("unsupported protocol versions", e))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| tls_error("certificate and key do not match", e))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Accept TLS connections until `token` is cancelled, then drain open connections
pub(crate) async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    token: CancellationToken,
) -> Result<(), ServeError> {
    let acceptor = TlsAcceptor::from(server_config(tls)?);
    let connections = TaskTracker::new();

    loop {
        let (stream, peer) = tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept TCP connection");
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(router.clone());
        let token = token.clone();
        connections.spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(tls_stream) => tls_stream,
                Err(e) => {
                    debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };
            let builder = Builder::new(TokioExecutor::new());
            let connection = builder.serve_connection(TokioIo::new(tls_stream), service);
            tokio::pin!(connection);
            let result = tokio::select! {
                result = connection.as_mut() => result,
                () = token.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(e) = result {
                debug!(%peer, error = %e, "connection closed with error");
            }
        });
    }

    info!("TLS listener stopped, draining connections");
    connections.close();
    connections.wait().await;
    Ok(())
}
