// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// PKI subsystem: on-disk CA/server/client certificate lifecycle and
// TLS client/server config assembly for the remote backend's
// mutually-authenticated transport (spec.md §4.9).
//
// Home directory layout under `MIRROR_HOME` (default resolved in
// `config.rs`):
//   ca/ca.pem, ca/key.pem       — this node's own CA
//   ca/<name>.pem               — imported/trusted foreign CAs
//   certs/cert.pem, certs/cert-key.pem               — client cert
//   certs/server-cert.pem, certs/server-key.pem      — server cert

use crate::error::{MirrorError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::info;

static CA_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap());

pub struct Pki {
    home: PathBuf,
}

impl Pki {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    fn ca_dir(&self) -> PathBuf {
        self.home.join("ca")
    }

    fn certs_dir(&self) -> PathBuf {
        self.home.join("certs")
    }

    fn ca_cert_path(&self) -> PathBuf {
        self.ca_dir().join("ca.pem")
    }

    fn ca_key_path(&self) -> PathBuf {
        self.ca_dir().join("key.pem")
    }

    fn client_cert_path(&self) -> PathBuf {
        self.certs_dir().join("cert.pem")
    }

    fn client_key_path(&self) -> PathBuf {
        self.certs_dir().join("cert-key.pem")
    }

    fn server_cert_path(&self) -> PathBuf {
        self.certs_dir().join("server-cert.pem")
    }

    fn server_key_path(&self) -> PathBuf {
        self.certs_dir().join("server-key.pem")
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.ca_dir(), self.certs_dir()] {
            std::fs::create_dir_all(&dir)?;
            set_owner_only(&dir)?;
        }
        Ok(())
    }

    /// Idempotent: does nothing if `ca/ca.pem` already exists. Otherwise
    /// generates a CA, a server cert for `ca_host`, and a client cert,
    /// all signed by the fresh CA (spec.md §4.9, S4).
    pub fn configure(&self, ca_host: &str) -> Result<()> {
        self.ensure_dirs()?;

        if self.ca_cert_path().exists() {
            info!(home = %self.home.display(), "PKI already configured, skipping");
            return Ok(());
        }

        let ca = generate_ca(ca_host)?;
        write_pem(&self.ca_cert_path(), ca.cert.pem().as_bytes())?;
        write_pem(&self.ca_key_path(), ca.key_pair.serialize_pem().as_bytes())?;

        let server = generate_leaf(&ca, &["localhost".to_string(), ca_host.to_string()], "localhost")?;
        write_pem(&self.server_cert_path(), server.cert.pem().as_bytes())?;
        write_pem(&self.server_key_path(), server.key_pair.serialize_pem().as_bytes())?;

        let client = generate_leaf(&ca, &["localhost".to_string()], "client")?;
        write_pem(&self.client_cert_path(), client.cert.pem().as_bytes())?;
        write_pem(&self.client_key_path(), client.key_pair.serialize_pem().as_bytes())?;

        Ok(())
    }

    /// Import and trust a foreign CA under a stable, sanitized name.
    /// Rejects any `name` that doesn't match `^[A-Za-z0-9_.\-]+$`
    /// (spec.md §8, Testable Property 9).
    pub fn import_ca(&self, name: &str, pem_path: &Path) -> Result<()> {
        if !CA_NAME_PATTERN.is_match(name) {
            return Err(MirrorError::PkiInvalid(format!("CA name {name:?} contains disallowed characters")));
        }
        self.ensure_dirs()?;
        let pem = std::fs::read(pem_path)?;
        parse_certs(&pem).map_err(|_| MirrorError::PkiInvalid(format!("{} is not a valid PEM certificate", pem_path.display())))?;
        write_pem(&self.ca_dir().join(format!("{name}.pem")), &pem)?;
        Ok(())
    }

    /// Issue a fresh client certificate+key under `certs/`, signed by
    /// this node's own CA, with the given SANs (spec.md §4.9, "Generate
    /// client certificate"). Overwrites any existing client cert/key.
    pub fn generate_client_cert(&self, hosts: &[String]) -> Result<()> {
        self.ensure_dirs()?;
        let ca = self.load_ca()?;
        let sans = if hosts.is_empty() {
            vec!["localhost".to_string()]
        } else {
            hosts.to_vec()
        };
        let client = generate_leaf(&ca, &sans, "client")?;
        write_pem(&self.client_cert_path(), client.cert.pem().as_bytes())?;
        write_pem(&self.client_key_path(), client.key_pair.serialize_pem().as_bytes())?;
        Ok(())
    }

    /// Load this node's own CA certificate and key back into an
    /// `rcgen::Issuer`-ready pair, for signing a freshly generated cert.
    fn load_ca(&self) -> Result<Ca> {
        if !self.ca_cert_path().exists() || !self.ca_key_path().exists() {
            return Err(MirrorError::PkiMissing(format!(
                "no CA material under {}; run --configure first",
                self.ca_dir().display()
            )));
        }
        let cert_pem = std::fs::read_to_string(self.ca_cert_path())?;
        let key_pem = std::fs::read_to_string(self.ca_key_path())?;
        let key_pair = rcgen::KeyPair::from_pem(&key_pem)
            .map_err(|e| MirrorError::PkiInvalid(format!("invalid CA key: {e}")))?;
        let params = rcgen::CertificateParams::from_ca_cert_pem(&cert_pem)
            .map_err(|e| MirrorError::PkiInvalid(format!("invalid CA certificate: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| MirrorError::PkiInvalid(format!("re-deriving CA certificate: {e}")))?;
        Ok(Ca { cert, key_pair })
    }

    /// Replace this node's client certificate/key with an externally
    /// supplied pair (e.g. one issued by another node's CA).
    pub fn import_client_cert(&self, cert_pem_path: &Path, key_pem_path: &Path) -> Result<()> {
        self.ensure_dirs()?;
        let cert = std::fs::read(cert_pem_path)?;
        let key = std::fs::read(key_pem_path)?;
        parse_certs(&cert).map_err(|_| MirrorError::PkiInvalid("client cert is not valid PEM".into()))?;
        write_pem(&self.client_cert_path(), &cert)?;
        write_pem(&self.client_key_path(), &key)?;
        Ok(())
    }

    /// Remove the entire PKI home directory. Other nodes that trusted
    /// this node's CA will need to re-import it.
    pub fn remove(&self) -> Result<()> {
        if self.home.exists() {
            std::fs::remove_dir_all(&self.home)?;
        }
        Ok(())
    }

    /// All trusted CAs: this node's own CA plus any imported ones.
    fn trusted_ca_paths(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let ca_dir = self.ca_dir();
        if let Ok(read) = std::fs::read_dir(&ca_dir) {
            for entry in read.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("pem") && path.file_name() != Some(std::ffi::OsStr::new("key.pem")) {
                    out.push(path);
                }
            }
        }
        out
    }

    /// Build a client TLS config presenting this node's client cert and
    /// trusting its CA set. `insecure` skips server verification
    /// entirely (spec.md Glossary, "Insecure mode").
    pub fn client_tls_config(&self, insecure: bool) -> Result<Arc<ClientConfig>> {
        self.client_tls_config_with_identity(insecure, None)
    }

    /// Like `client_tls_config`, but presents an explicitly supplied
    /// cert/key pair (spec.md §6's `--cert`/`--key` sync flags) instead
    /// of this node's default `certs/cert.pem` identity. The CA trust
    /// set is still read from this node's `ca/` directory either way.
    pub fn client_tls_config_with_identity(
        &self,
        insecure: bool,
        identity: Option<(&Path, &Path)>,
    ) -> Result<Arc<ClientConfig>> {
        if insecure {
            return Ok(Arc::new(insecure_client_config()));
        }

        let ca_paths = self.trusted_ca_paths();
        if ca_paths.is_empty() {
            return Err(MirrorError::PkiMissing(format!(
                "no trusted CA material under {}",
                self.ca_dir().display()
            )));
        }

        let mut roots = RootCertStore::empty();
        for path in &ca_paths {
            let pem = std::fs::read(path)?;
            for cert in parse_certs(&pem).map_err(|_| MirrorError::PkiInvalid(format!("{} is not valid PEM", path.display())))? {
                roots
                    .add(cert)
                    .map_err(|e| MirrorError::PkiInvalid(format!("invalid CA certificate: {e}")))?;
            }
        }

        let (cert_chain, key) = match identity {
            Some((cert, key)) => load_identity(cert, key)?,
            None => self.load_client_identity()?,
        };

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(cert_chain, key)
            .map_err(|e| MirrorError::PkiInvalid(format!("invalid client certificate/key pair: {e}")))?;

        Ok(Arc::new(config))
    }

    /// Build a server TLS config requiring and verifying client
    /// certificates against the trusted CA set.
    pub fn server_tls_config(&self, insecure: bool) -> Result<Arc<ServerConfig>> {
        let (cert_chain, key) = self.load_server_identity()?;

        if insecure {
            let config = ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(cert_chain, key)
                .map_err(|e| MirrorError::PkiInvalid(format!("invalid server certificate/key pair: {e}")))?;
            return Ok(Arc::new(config));
        }

        let ca_paths = self.trusted_ca_paths();
        if ca_paths.is_empty() {
            return Err(MirrorError::PkiMissing(format!(
                "no trusted CA material under {}",
                self.ca_dir().display()
            )));
        }

        let mut roots = RootCertStore::empty();
        for path in &ca_paths {
            let pem = std::fs::read(path)?;
            for cert in parse_certs(&pem).map_err(|_| MirrorError::PkiInvalid(format!("{} is not valid PEM", path.display())))? {
                roots
                    .add(cert)
                    .map_err(|e| MirrorError::PkiInvalid(format!("invalid CA certificate: {e}")))?;
            }
        }

        let verifier = tokio_rustls::rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| MirrorError::PkiInvalid(format!("building client verifier: {e}")))?;

        let config = ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(cert_chain, key)
            .map_err(|e| MirrorError::PkiInvalid(format!("invalid server certificate/key pair: {e}")))?;

        Ok(Arc::new(config))
    }

    fn load_client_identity(&self) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        load_identity(&self.client_cert_path(), &self.client_key_path())
    }

    fn load_server_identity(&self) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        load_identity(&self.server_cert_path(), &self.server_key_path())
    }
}

fn load_identity(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    if !cert_path.exists() || !key_path.exists() {
        return Err(MirrorError::PkiMissing(format!(
            "missing certificate material: {} / {}",
            cert_path.display(),
            key_path.display()
        )));
    }
    let cert_pem = std::fs::read(cert_path)?;
    let key_pem = std::fs::read(key_path)?;

    let cert_chain = parse_certs(&cert_pem).map_err(|_| MirrorError::PkiInvalid(format!("{} is not valid PEM", cert_path.display())))?;
    let mut keys = pkcs8_private_keys(&mut key_pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| MirrorError::PkiInvalid(format!("{} is not a valid PKCS8 key", key_path.display())))?;
    let key = keys
        .pop()
        .ok_or_else(|| MirrorError::PkiInvalid(format!("{} contains no private key", key_path.display())))?;

    Ok((cert_chain, PrivateKeyDer::Pkcs8(key)))
}

fn parse_certs(pem: &[u8]) -> std::result::Result<Vec<CertificateDer<'static>>, std::io::Error> {
    certs(&mut std::io::Cursor::new(pem)).collect()
}

fn write_pem(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)?;
    set_owner_only(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if path.is_dir() { 0o700 } else { 0o600 };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> Result<()> {
    Ok(())
}

struct GeneratedCert {
    cert: rcgen::Certificate,
    key_pair: rcgen::KeyPair,
}

struct Ca {
    cert: rcgen::Certificate,
    key_pair: rcgen::KeyPair,
}

fn generate_ca(ca_host: &str) -> Result<Ca> {
    let mut params = rcgen::CertificateParams::new(vec![ca_host.to_string()])
        .map_err(|e| MirrorError::PkiInvalid(format!("invalid CA host {ca_host:?}: {e}")))?;
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, ca_host);

    let key_pair = rcgen::KeyPair::generate().map_err(|e| MirrorError::PkiInvalid(format!("key generation failed: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| MirrorError::PkiInvalid(format!("CA self-sign failed: {e}")))?;
    Ok(Ca { cert, key_pair })
}

fn generate_leaf(ca: &Ca, hosts: &[String], common_name: &str) -> Result<GeneratedCert> {
    let mut params = rcgen::CertificateParams::new(hosts.to_vec())
        .map_err(|e| MirrorError::PkiInvalid(format!("invalid subject alt names {hosts:?}: {e}")))?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);

    let key_pair = rcgen::KeyPair::generate().map_err(|e| MirrorError::PkiInvalid(format!("key generation failed: {e}")))?;
    let issuer = rcgen::Issuer::new(ca.cert.params().clone(), &ca.key_pair);
    let cert = params
        .signed_by(&key_pair, &issuer)
        .map_err(|e| MirrorError::PkiInvalid(format!("leaf signing failed: {e}")))?;

    Ok(GeneratedCert { cert, key_pair })
}

fn insecure_client_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoVerify))
        .with_no_client_auth()
}

mod danger {
    use tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use tokio_rustls::rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerify;

    impl ServerCertVerifier for NoVerify {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ED25519,
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_creates_all_six_files() {
        let tmp = tempfile::tempdir().unwrap();
        let pki = Pki::new(tmp.path());
        pki.configure("localhost").unwrap();

        for path in [
            pki.ca_cert_path(),
            pki.ca_key_path(),
            pki.server_cert_path(),
            pki.server_key_path(),
            pki.client_cert_path(),
            pki.client_key_path(),
        ] {
            assert!(path.exists(), "expected {} to exist", path.display());
        }
    }

    #[test]
    fn configure_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let pki = Pki::new(tmp.path());
        pki.configure("localhost").unwrap();
        let first = std::fs::read(pki.ca_cert_path()).unwrap();
        pki.configure("localhost").unwrap();
        let second = std::fs::read(pki.ca_cert_path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn client_config_without_ca_material_is_pki_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let pki = Pki::new(tmp.path());
        let err = pki.client_tls_config(false).unwrap_err();
        assert!(matches!(err, MirrorError::PkiMissing(_)));
    }

    #[test]
    fn insecure_client_config_succeeds_without_any_material() {
        let tmp = tempfile::tempdir().unwrap();
        let pki = Pki::new(tmp.path());
        assert!(pki.client_tls_config(true).is_ok());
    }

    #[test]
    fn import_ca_rejects_disallowed_names() {
        let tmp = tempfile::tempdir().unwrap();
        let pki = Pki::new(tmp.path());
        let bogus = tmp.path().join("bogus.pem");
        std::fs::write(&bogus, b"not a cert").unwrap();
        let err = pki.import_ca("../escape", &bogus).unwrap_err();
        assert!(matches!(err, MirrorError::PkiInvalid(_)));
    }

    #[test]
    fn import_ca_accepts_a_valid_name_and_pem() {
        let tmp = tempfile::tempdir().unwrap();
        let source_pki = Pki::new(tmp.path().join("source"));
        source_pki.configure("localhost").unwrap();

        let dest_pki = Pki::new(tmp.path().join("dest"));
        dest_pki
            .import_ca("source-node", &source_pki.ca_cert_path())
            .unwrap();
        assert!(dest_pki.ca_dir().join("source-node.pem").exists());
    }

    #[test]
    fn generate_client_cert_requires_an_existing_ca() {
        let tmp = tempfile::tempdir().unwrap();
        let pki = Pki::new(tmp.path());
        let err = pki.generate_client_cert(&["localhost".to_string()]).unwrap_err();
        assert!(matches!(err, MirrorError::PkiMissing(_)));
    }

    #[test]
    fn generate_client_cert_rewrites_client_material() {
        let tmp = tempfile::tempdir().unwrap();
        let pki = Pki::new(tmp.path());
        pki.configure("localhost").unwrap();
        let before = std::fs::read(pki.client_cert_path()).unwrap();

        pki.generate_client_cert(&["localhost".to_string(), "client2".to_string()])
            .unwrap();
        let after = std::fs::read(pki.client_cert_path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn remove_deletes_the_home_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let pki = Pki::new(tmp.path().join("home"));
        pki.configure("localhost").unwrap();
        pki.remove().unwrap();
        assert!(!tmp.path().join("home").exists());
    }
}
