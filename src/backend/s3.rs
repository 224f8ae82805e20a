// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// S3-compatible object-store backend. Four URL forms are recognized,
// mirroring the original's regex grammar exactly (virtual-host and
// path-style, each with an optional explicit region); `us-east-1` is
// the default region when none is embedded in the host.
//
// Only `Write` is implemented. `Read`/`Stat`/`ReadDir` are an explicit
// non-goal (spec.md §9, "S3 read path") — the sync engine currently
// only ever treats an S3 backend as a destination.

use super::FileSystem;
use crate::entry::{BackendMetadata, Entry};
use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3UrlInfo {
    pub bucket: String,
    pub region: String,
    pub base_url: String,
}

static VIRTUAL_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(s3://([a-zA-Z0-9._-]+)\.s3\.amazonaws\.com)").unwrap());
static VIRTUAL_HOST_REGION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(s3://([a-zA-Z0-9._-]+)\.s3-([a-zA-Z0-9._-]+)\.amazonaws\.com)").unwrap());
static PATH_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(s3://s3\.amazonaws\.com/([a-zA-Z0-9._-]+))/").unwrap());
static PATH_STYLE_REGION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(s3://s3-([a-zA-Z0-9._-]+)\.amazonaws\.com/([a-zA-Z0-9._-]+))/").unwrap());

const DEFAULT_REGION: &str = "us-east-1";

/// Parse an `s3://` URL into bucket, region, and base-URL components.
/// Fails with `InvalidUrl` for any string not matching one of the four
/// recognized forms (spec.md §4.5).
pub fn parse_s3_url(url: &str) -> Result<S3UrlInfo> {
    if let Some(c) = VIRTUAL_HOST.captures(url) {
        return Ok(S3UrlInfo {
            base_url: c[1].to_string(),
            bucket: c[2].to_string(),
            region: DEFAULT_REGION.to_string(),
        });
    }
    if let Some(c) = VIRTUAL_HOST_REGION.captures(url) {
        return Ok(S3UrlInfo {
            base_url: c[1].to_string(),
            bucket: c[2].to_string(),
            region: c[3].to_string(),
        });
    }
    if let Some(c) = PATH_STYLE.captures(url) {
        return Ok(S3UrlInfo {
            base_url: c[1].to_string(),
            bucket: c[2].to_string(),
            region: DEFAULT_REGION.to_string(),
        });
    }
    if let Some(c) = PATH_STYLE_REGION.captures(url) {
        return Ok(S3UrlInfo {
            base_url: c[1].to_string(),
            bucket: c[3].to_string(),
            region: c[2].to_string(),
        });
    }
    Err(MirrorError::InvalidUrl(format!("not a recognized S3 URL: {url}")))
}

fn mime_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next().unwrap_or("") {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gz" => "application/gzip",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

pub struct S3Backend {
    client: aws_sdk_s3::Client,
    info: S3UrlInfo,
}

impl S3Backend {
    pub fn new(client: aws_sdk_s3::Client, info: S3UrlInfo) -> Self {
        Self { client, info }
    }

    /// Strip the base URL prefix from an absolute path to derive the
    /// object key, per spec.md §4.5 ("Write strips the base URL prefix").
    fn key_for(&self, path: &str) -> String {
        path.strip_prefix(&self.info.base_url)
            .unwrap_or(path)
            .trim_start_matches('/')
            .to_string()
    }

    fn not_implemented(op: &str) -> MirrorError {
        MirrorError::Io(format!("S3 backend does not implement {op} (write-only by design)"))
    }
}

#[async_trait]
impl FileSystem for S3Backend {
    fn backend_type(&self) -> &'static str {
        "s3"
    }

    async fn stat(&self, _path: &str) -> Result<Entry> {
        Err(Self::not_implemented("stat"))
    }

    async fn read_dir(&self, _path: &str) -> Result<Vec<Entry>> {
        Err(Self::not_implemented("read_dir"))
    }

    async fn read(&self, _path: &str) -> Result<Vec<u8>> {
        Err(Self::not_implemented("read"))
    }

    async fn write(&self, entry: &Entry, data: &[u8]) -> Result<()> {
        let key = self.key_for(&entry.path);
        let content_type = mime_type_for(&entry.name);
        self.client
            .put_object()
            .bucket(&self.info.bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()))
            .content_type(content_type)
            .acl(aws_sdk_s3::types::ObjectCannedAcl::BucketOwnerFullControl)
            .send()
            .await
            .map_err(|e| MirrorError::Remote(format!("S3 PutObject failed for {key}: {e}")))?;
        Ok(())
    }

    async fn mkdir(&self, _entry: &Entry) -> Result<()> {
        // S3 has no real directories; common prefixes appear implicitly
        // once an object with that prefix exists.
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let key = self.key_for(path);
        self.client
            .delete_object()
            .bucket(&self.info.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| MirrorError::Remote(format!("S3 DeleteObject failed for {key}: {e}")))?;
        Ok(())
    }
}

/// Derive `BackendMetadata::S3` from a PutObject response's ETag, for
/// callers that want to stash it on the written `Entry`.
pub fn etag_metadata(etag: Option<String>) -> BackendMetadata {
    BackendMetadata::S3 { etag }
}
