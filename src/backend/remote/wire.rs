// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// Wire protocol for the remote backend: a length-prefixed bincode
// envelope per request/response, carried over a mutually-authenticated
// TLS stream (spec.md §4.6). One request variant per `FileSystem`
// operation; the response envelope is uniform across all of them.

use crate::entry::Entry;
use crate::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    Stat { path: String },
    ReadDir { path: String },
    Read { path: String },
    Write { entry: Entry, data: Vec<u8> },
    /// Carries the full `Entry` (not just the path) so the daemon can
    /// replicate the destination's mode bits, matching the local
    /// backend's `mkdir` contract (spec.md §4.3).
    Mkdir { entry: Entry },
    Delete { path: String },
    /// One round trip for the whole subtree, rather than one `Stat`
    /// plus one `ReadDir` per directory (spec.md §4.6's "one request
    /// type per backend operation" covers all eight §4.3 operations,
    /// not just the six single-entry ones).
    FileMap { path: String },
    FileTree { path: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Payload {
    Entry(Entry),
    Entries(Vec<Entry>),
    Bytes(Vec<u8>),
    /// A flattened `FileMap`'s entries; the client re-derives keys by
    /// stripping the requested root from each entry's path, same as
    /// `FileTree::flatten` does locally. `None` when the requested root
    /// was not a directory (spec.md §4.3, "Returns nil for
    /// non-directories").
    Map(Option<Vec<Entry>>),
    /// A `FileTree`'s arena, as `(entry, parent index)` pairs in arena
    /// order (see `FileTree::to_wire_nodes`/`from_wire_nodes`). `None`
    /// for the same reason as `Map` above.
    Tree(Option<Vec<(Entry, Option<usize>)>>),
    Unit,
}

/// The common response envelope: `{success, error}` plus an optional
/// return value, per spec.md §4.6.
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub error: Option<String>,
    pub payload: Option<Payload>,
}

impl Response {
    pub fn ok(payload: Payload) -> Self {
        Self {
            success: true,
            error: None,
            payload: Some(payload),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            payload: None,
        }
    }

    pub fn into_result(self) -> Result<Payload> {
        if self.success {
            Ok(self.payload.unwrap_or(Payload::Unit))
        } else {
            Err(MirrorError::Remote(self.error.unwrap_or_default()))
        }
    }
}

/// Write a single length-prefixed bincode frame: a 4-byte big-endian
/// length followed by the encoded value.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(value)?;
    let len = bytes.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a single length-prefixed bincode frame.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncReadExt + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(MirrorError::Io(format!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit")));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(bincode::deserialize(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trips_through_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let req = Request::Stat {
            path: "/tmp/src".to_string(),
        };
        write_frame(&mut client, &req).await.unwrap();
        let got: Request = read_frame(&mut server).await.unwrap();
        match got {
            Request::Stat { path } => assert_eq!(path, "/tmp/src"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn response_into_result_propagates_remote_error() {
        let resp = Response::err("boom");
        let err = resp.into_result().unwrap_err();
        assert!(matches!(err, MirrorError::Remote(_)));
    }

    #[tokio::test]
    async fn mkdir_request_carries_the_full_entry() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let entry = Entry::new("dir", "/tmp/dst/dir", crate::entry::Mode::dir(0o750));
        write_frame(&mut client, &Request::Mkdir { entry: entry.clone() })
            .await
            .unwrap();
        match read_frame::<_, Request>(&mut server).await.unwrap() {
            Request::Mkdir { entry: got } => {
                assert_eq!(got.path, entry.path);
                assert_eq!(got.mode, entry.mode);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn file_map_and_file_tree_requests_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, &Request::FileMap { path: "/tmp/src".to_string() })
            .await
            .unwrap();
        match read_frame::<_, Request>(&mut server).await.unwrap() {
            Request::FileMap { path } => assert_eq!(path, "/tmp/src"),
            _ => panic!("wrong variant"),
        }

        write_frame(&mut client, &Request::FileTree { path: "/tmp/src".to_string() })
            .await
            .unwrap();
        match read_frame::<_, Request>(&mut server).await.unwrap() {
            Request::FileTree { path } => assert_eq!(path, "/tmp/src"),
            _ => panic!("wrong variant"),
        }
    }
}
