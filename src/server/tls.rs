//! TLS termination for the client endpoint

use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::error::EndpointError;

/// Upper bound on a single handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a rustls server config from PEM key and certificate files
pub fn load_tls_config(key: &Path, cert: &Path) -> Result<Arc<rustls::ServerConfig>, EndpointError> {
    let certs = {
        let mut reader = BufReader::new(open(cert)?);
        rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EndpointError::Tls(format!("{}: {}", cert.display(), e)))?
    };
    if certs.is_empty() {
        return Err(EndpointError::Tls(format!(
            "no certificates in {}",
            cert.display()
        )));
    }

    let key_der = {
        let mut reader = BufReader::new(open(key)?);
        rustls_pemfile::private_key(&mut reader)
            .map_err(|e| EndpointError::Tls(format!("{}: {}", key.display(), e)))?
            .ok_or_else(|| EndpointError::Tls(format!("no private key in {}", key.display())))?
    };

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| EndpointError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key_der)
        .map_err(|e| EndpointError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

fn open(path: &Path) -> Result<File, EndpointError> {
    File::open(path).map_err(|e| EndpointError::Tls(format!("{}: {}", path.display(), e)))
}

/// Completed handshakes waiting for the server to pick them up
const HANDSHAKE_BACKLOG: usize = 64;

/// TCP listener that hands out streams with a finished TLS handshake.
///
/// Handshakes run on their own tasks, so a client that connects and then
/// stays silent only ties up its own connection.
pub struct TlsListener {
    local_addr: SocketAddr,
    ready: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    acceptor_task: JoinHandle<()>,
}

impl TlsListener {
    /// Start accepting on `inner`. Must be called inside a runtime.
    pub fn new(inner: TcpListener, config: Arc<rustls::ServerConfig>) -> io::Result<Self> {
        let local_addr = inner.local_addr()?;
        let (tx, ready) = mpsc::channel(HANDSHAKE_BACKLOG);
        let acceptor_task = tokio::spawn(accept_loop(inner, TlsAcceptor::from(config), tx));
        Ok(Self {
            local_addr,
            ready,
            acceptor_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        // Releases the socket
        self.acceptor_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    ready: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let ready = ready.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    let _ = ready.send((tls, addr)).await;
                }
                Ok(Err(e)) => tracing::debug!("TLS handshake with {} failed: {}", addr, e),
                Err(_) => tracing::debug!("TLS handshake with {} timed out", addr),
            }
        });
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.ready.recv().await {
            Some(connection) => connection,
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_are_tls_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_tls_config(&dir.path().join("key.pem"), &dir.path().join("cert.pem"));
        assert!(matches!(result, Err(EndpointError::Tls(_))));
    }

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
    }

    #[test]
    fn test_loads_pem_pair() {
        let config = load_tls_config(&fixture("localhost.key"), &fixture("localhost.crt")).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[tokio::test]
    async fn test_listener_reports_bound_address() {
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = inner.local_addr().unwrap();
        let config = load_tls_config(&fixture("localhost.key"), &fixture("localhost.crt")).unwrap();
        let listener = TlsListener::new(inner, config).unwrap();
        assert_eq!(axum::serve::Listener::local_addr(&listener).unwrap(), addr);

        // The socket is released with the listener
        drop(listener);
        tokio::time::sleep(Duration::from_millis(50)).await;
        TcpListener::bind(addr).await.unwrap();
    }

    #[test]
    fn test_empty_certificate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key.pem");
        let cert = dir.path().join("cert.pem");
        std::fs::write(&key, "").unwrap();
        std::fs::write(&cert, "").unwrap();
        let err = load_tls_config(&key, &cert).unwrap_err();
        assert!(err.to_string().contains("no certificates"));
    }
}
