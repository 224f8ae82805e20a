// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// Ambient configuration: environment-variable resolution for the PKI
// home directory, plus the CLI-assembled configuration types threaded
// through `main.rs` (spec.md §4.6, "Environment variables"). S3
// credentials are not modeled here: they're resolved through an
// explicit provider chain built directly against the AWS SDK in
// `lib.rs`, ordered to match spec.md §4.5.

use std::path::PathBuf;

pub const MIRROR_HOME_ENV: &str = "MIRROR_HOME";

/// Resolve the PKI home directory: `$MIRROR_HOME` if set, otherwise
/// `~/.mirror.d/pki` (falling back to `.mirror.d/pki` if the home
/// directory can't be determined).
pub fn mirror_home() -> PathBuf {
    if let Ok(home) = std::env::var(MIRROR_HOME_ENV) {
        return PathBuf::from(home);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".mirror.d").join("pki"),
        None => PathBuf::from(".mirror.d").join("pki"),
    }
}

/// Top-level sync configuration assembled from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub src: String,
    pub dest: String,
    pub excludes: Vec<String>,
    pub watch: bool,
    pub insecure: bool,
}

/// TLS material configuration shared by client and daemon roles.
#[derive(Debug, Clone)]
pub struct PkiConfig {
    pub home: PathBuf,
    pub insecure: bool,
}

impl PkiConfig {
    pub fn from_env(insecure: bool) -> Self {
        Self {
            home: mirror_home(),
            insecure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_home_env_override_wins() {
        std::env::set_var(MIRROR_HOME_ENV, "/tmp/custom-mirror-home");
        assert_eq!(mirror_home(), PathBuf::from("/tmp/custom-mirror-home"));
        std::env::remove_var(MIRROR_HOME_ENV);
    }

    #[test]
    fn pki_config_from_env_carries_insecure_flag() {
        let config = PkiConfig::from_env(true);
        assert!(config.insecure);
    }
}
