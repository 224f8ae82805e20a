// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// Client-side remote backend: tunnels each FileSystem operation to a
// peer daemon over a mutually-authenticated TLS stream. One connection
// per operation keeps the client simple; the daemon is cheap to accept
// from (spec.md §4.6).

use super::wire::{read_frame, write_frame, Payload, Request, Response};
use crate::backend::FileSystem;
use crate::entry::Entry;
use crate::error::{MirrorError, Result};
use crate::tree::{FileMap, FileTree};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

pub struct RemoteBackend {
    host: String,
    port: u16,
    tls_config: Arc<tokio_rustls::rustls::ClientConfig>,
}

impl RemoteBackend {
    pub fn new(host: impl Into<String>, port: u16, tls_config: Arc<tokio_rustls::rustls::ClientConfig>) -> Self {
        Self {
            host: host.into(),
            port,
            tls_config,
        }
    }

    async fn roundtrip(&self, request: Request) -> Result<Payload> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| MirrorError::Io(format!("connecting to {}:{}: {e}", self.host, self.port)))?;

        let connector = TlsConnector::from(self.tls_config.clone());
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| MirrorError::InvalidUrl(format!("invalid remote host {:?}: {e}", self.host)))?;

        let mut stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| MirrorError::Remote(format!("TLS handshake with {} failed: {e}", self.host)))?;

        write_frame(&mut stream, &request).await?;
        let response: Response = read_frame(&mut stream).await?;
        response.into_result()
    }
}

#[async_trait]
impl FileSystem for RemoteBackend {
    fn backend_type(&self) -> &'static str {
        "remote"
    }

    async fn stat(&self, path: &str) -> Result<Entry> {
        match self.roundtrip(Request::Stat { path: path.to_string() }).await? {
            Payload::Entry(e) => Ok(e),
            _ => Err(MirrorError::Remote("unexpected payload for stat".into())),
        }
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
        match self
            .roundtrip(Request::ReadDir { path: path.to_string() })
            .await?
        {
            Payload::Entries(e) => Ok(e),
            _ => Err(MirrorError::Remote("unexpected payload for read_dir".into())),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        match self.roundtrip(Request::Read { path: path.to_string() }).await? {
            Payload::Bytes(b) => Ok(b),
            _ => Err(MirrorError::Remote("unexpected payload for read".into())),
        }
    }

    async fn write(&self, entry: &Entry, data: &[u8]) -> Result<()> {
        self.roundtrip(Request::Write {
            entry: entry.clone(),
            data: data.to_vec(),
        })
        .await?;
        Ok(())
    }

    async fn mkdir(&self, entry: &Entry) -> Result<()> {
        self.roundtrip(Request::Mkdir { entry: entry.clone() }).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.roundtrip(Request::Delete { path: path.to_string() }).await?;
        Ok(())
    }

    /// Overrides the default per-entry walk with a single round trip:
    /// the daemon builds the whole `FileMap` locally and ships it back
    /// as one `Payload::Map` (spec.md §4.6). `None` when `root` is not
    /// a directory, same as the default trait implementation.
    async fn file_map(&self, root: &Entry) -> Result<Option<FileMap>> {
        match self
            .roundtrip(Request::FileMap { path: root.path.clone() })
            .await?
        {
            Payload::Map(Some(entries)) => {
                let mut map = FileMap::new(&root.path);
                for entry in entries {
                    map.insert_absolute(entry);
                }
                Ok(Some(map))
            }
            Payload::Map(None) => Ok(None),
            _ => Err(MirrorError::Remote("unexpected payload for file_map".into())),
        }
    }

    /// Overrides the default per-entry walk with a single round trip,
    /// same rationale as `file_map` above.
    async fn file_tree(&self, root: &Entry) -> Result<Option<FileTree>> {
        match self
            .roundtrip(Request::FileTree { path: root.path.clone() })
            .await?
        {
            Payload::Tree(Some(nodes)) => Ok(Some(FileTree::from_wire_nodes(nodes))),
            Payload::Tree(None) => Ok(None),
            _ => Err(MirrorError::Remote("unexpected payload for file_tree".into())),
        }
    }
}
