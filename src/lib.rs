// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// mirror: bidirectional file-tree synchronizer across local, remote,
// and S3-compatible backends.

pub mod backend;
pub mod config;
pub mod entry;
pub mod error;
pub mod pki;
pub mod registry;
pub mod sync;
pub mod tree;
pub mod url;

pub use backend::FileSystem;
pub use entry::{BackendMetadata, Entry, Mode};
pub use error::{MirrorError, Result};
pub use registry::{BackendContext, BackendRegistry};
pub use sync::SyncOptions;
pub use tree::{Comparator, ExistenceComparator, FileMap, FileTree, ModifiedComparator};
pub use url::MirrorUrl;

/// Build a `BackendRegistry` with the local, S3, and remote backends
/// registered under their canonical schemes, plus the `http`/`ssh`
/// aliases for the remote peer scheme (spec.md §4.1).
pub fn default_registry() -> BackendRegistry {
    let registry = BackendRegistry::new();

    registry.register(
        url::LOCAL_SCHEME,
        std::sync::Arc::new(|_url: MirrorUrl, _ctx: BackendContext| {
            Box::pin(async move { Ok(Box::new(backend::local::LocalBackend::new()) as Box<dyn FileSystem>) })
                as registry::BackendFuture
        }),
    );

    registry.register(
        "s3",
        std::sync::Arc::new(|url: MirrorUrl, _ctx: BackendContext| {
            Box::pin(async move {
                let raw = url.to_raw();
                let info = backend::s3::parse_s3_url(&raw)?;
                let credentials = s3_credentials_provider();
                let sdk_config = aws_config::from_env()
                    .region(aws_sdk_s3::config::Region::new(info.region.clone()))
                    .credentials_provider(credentials)
                    .load()
                    .await;
                let client = aws_sdk_s3::Client::new(&sdk_config);
                Ok(Box::new(backend::s3::S3Backend::new(client, info)) as Box<dyn FileSystem>)
            }) as registry::BackendFuture
        }),
    );

    registry.register(
        "mirror",
        std::sync::Arc::new(|url: MirrorUrl, ctx: BackendContext| {
            Box::pin(async move {
                let tls_config = ctx
                    .tls_client_config
                    .ok_or_else(|| MirrorError::PkiMissing("no TLS client config supplied to the remote backend factory".into()))?;
                let (host, port) = split_host_port(&url.host);
                Ok(Box::new(backend::remote::RemoteBackend::new(host, port, tls_config)) as Box<dyn FileSystem>)
            }) as registry::BackendFuture
        }),
    );
    registry.alias("http", "mirror");
    registry.alias("ssh", "mirror");

    registry
}

/// Build the S3 credential provider chain in the order spec.md §4.5
/// requires: a shared credentials file first, environment variables
/// second — the reverse of `aws_config`'s own default chain, and the
/// same order as the original's `auth()` (tries the shared credentials
/// file before falling back to the environment).
fn s3_credentials_provider() -> aws_config::meta::credentials::CredentialsProviderChain {
    aws_config::meta::credentials::CredentialsProviderChain::first_try(
        "shared-credentials-file",
        aws_config::profile::ProfileFileCredentialsProvider::builder().build(),
    )
    .or_else(
        "environment",
        aws_config::environment::EnvironmentVariableCredentialsProvider::new(),
    )
}

fn split_host_port(host: &str) -> (String, u16) {
    match host.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().unwrap_or(8123)),
        None => (host.to_string(), 8123),
    }
}
