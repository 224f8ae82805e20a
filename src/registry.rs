// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// Plugin registry: process-wide table mapping a URL scheme to a backend
// factory. Registration happens once at startup; after that the table is
// read-only, so a `RwLock` (not a redesign-flagged global) is enough.
//
// Factories take an explicit `BackendContext` rather than reaching into a
// process-wide TLS config variable (spec.md §9, "Global TLS config").

use crate::backend::FileSystem;
use crate::error::{MirrorError, Result};
use crate::url::MirrorUrl;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// Context threaded through every backend factory call: the pieces a
/// backend might need that used to live behind a global in the original.
#[derive(Clone, Default)]
pub struct BackendContext {
    pub tls_client_config: Option<Arc<rustls::ClientConfig>>,
    pub tls_server_config: Option<Arc<rustls::ServerConfig>>,
    pub insecure: bool,
}

pub type BackendFuture = Pin<Box<dyn Future<Output = Result<Box<dyn FileSystem>>> + Send>>;
pub type Factory = Arc<dyn Fn(MirrorUrl, BackendContext) -> BackendFuture + Send + Sync>;

/// Process-wide scheme -> factory table.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: Arc<RwLock<HashMap<String, Factory>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent replace: the last registration for a scheme wins.
    /// Intended to be called only during startup.
    pub fn register(&self, scheme: impl Into<String>, factory: Factory) {
        self.factories
            .write()
            .expect("backend registry lock poisoned")
            .insert(scheme.into(), factory);
    }

    /// `alias` registers a second scheme name resolving to whatever
    /// `target` currently maps to (used for the `http`/`ssh` aliases of
    /// the remote-peer scheme, spec.md §4.2).
    pub fn alias(&self, alias: impl Into<String>, target: &str) {
        let target_factory = {
            let map = self.factories.read().expect("backend registry lock poisoned");
            map.get(target).cloned()
        };
        if let Some(factory) = target_factory {
            self.register(alias, factory);
        }
    }

    pub fn lookup(&self, scheme: &str) -> Option<Factory> {
        self.factories
            .read()
            .expect("backend registry lock poisoned")
            .get(scheme)
            .cloned()
    }

    /// Resolve a backend instance for a URL, or fail with `NoBackend`.
    pub async fn resolve(&self, url: &MirrorUrl, ctx: BackendContext) -> Result<Box<dyn FileSystem>> {
        let factory = self
            .lookup(&url.scheme)
            .ok_or_else(|| MirrorError::NoBackend(url.scheme.clone()))?;
        factory(url.clone(), ctx).await
    }

    /// All registered factories, for diagnostics and testing.
    pub fn all(&self) -> Vec<(String, Factory)> {
        self.factories
            .read()
            .expect("backend registry lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;

    fn local_factory() -> Factory {
        Arc::new(|_url, _ctx| Box::pin(async { Ok(Box::new(LocalBackend::new()) as Box<dyn FileSystem>) }))
    }

    #[test]
    fn lookup_after_register_returns_same_factory_family() {
        let registry = BackendRegistry::new();
        registry.register("local", local_factory());
        assert!(registry.lookup("local").is_some());
    }

    #[test]
    fn lookup_of_unregistered_scheme_is_negative() {
        let registry = BackendRegistry::new();
        assert!(registry.lookup("nonexistent").is_none());
    }

    #[test]
    fn last_writer_wins_on_reregistration() {
        let registry = BackendRegistry::new();
        registry.register("local", local_factory());
        registry.register("local", local_factory());
        assert_eq!(registry.all().iter().filter(|(s, _)| s == "local").count(), 1);
    }

    #[test]
    fn alias_resolves_to_same_target() {
        let registry = BackendRegistry::new();
        registry.register("mirror", local_factory());
        registry.alias("http", "mirror");
        assert!(registry.lookup("http").is_some());
    }
}
