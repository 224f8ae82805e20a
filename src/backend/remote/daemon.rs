// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// Daemon side of the remote backend: accepts mutually-authenticated
// TLS connections and dispatches each incoming request to a concrete
// local `FileSystem`. Per spec.md §7, an error servicing one
// connection terminates that connection only — it never brings the
// daemon down.

use super::wire::{read_frame, write_frame, Payload, Request, Response};
use crate::backend::FileSystem;
use crate::error::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

pub struct Daemon {
    backend: Arc<dyn FileSystem>,
    tls_config: Arc<tokio_rustls::rustls::ServerConfig>,
}

impl Daemon {
    pub fn new(backend: Arc<dyn FileSystem>, tls_config: Arc<tokio_rustls::rustls::ServerConfig>) -> Self {
        Self { backend, tls_config }
    }

    /// Accept connections on `addr` until the process is killed. Each
    /// connection is handled on its own task; one connection's failure
    /// never affects another's.
    pub async fn serve(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        let acceptor = TlsAcceptor::from(self.tls_config.clone());
        info!(%addr, "daemon listening");

        loop {
            let (tcp, peer) = listener.accept().await?;
            let acceptor = acceptor.clone();
            let backend = self.backend.clone();

            tokio::spawn(async move {
                match acceptor.accept(tcp).await {
                    Ok(stream) => {
                        if let Err(e) = handle_connection(stream, backend).await {
                            warn!(%peer, error = %e, "connection ended with error");
                        }
                    }
                    Err(e) => warn!(%peer, error = %e, "TLS handshake failed"),
                }
            });
        }
    }
}

async fn handle_connection<S>(mut stream: S, backend: Arc<dyn FileSystem>) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let request: Request = read_frame(&mut stream).await?;
    let response = dispatch(&*backend, request).await;
    write_frame(&mut stream, &response).await?;
    Ok(())
}

async fn dispatch(backend: &dyn FileSystem, request: Request) -> Response {
    let outcome: Result<Payload> = async {
        Ok(match request {
            Request::Stat { path } => Payload::Entry(backend.stat(&path).await?),
            Request::ReadDir { path } => Payload::Entries(backend.read_dir(&path).await?),
            Request::Read { path } => Payload::Bytes(backend.read(&path).await?),
            Request::Write { entry, data } => {
                backend.write(&entry, &data).await?;
                Payload::Unit
            }
            Request::Mkdir { entry } => {
                backend.mkdir(&entry).await?;
                Payload::Unit
            }
            Request::Delete { path } => {
                backend.delete(&path).await?;
                Payload::Unit
            }
            Request::FileMap { path } => {
                let root = backend.stat(&path).await?;
                Payload::Map(backend.file_map(&root).await?.map(|m| m.into_entries()))
            }
            Request::FileTree { path } => {
                let root = backend.stat(&path).await?;
                Payload::Tree(backend.file_tree(&root).await?.map(|t| t.to_wire_nodes()))
            }
        })
    }
    .await;

    match outcome {
        Ok(payload) => Response::ok(payload),
        Err(e) => Response::err(e.to_string()),
    }
}
