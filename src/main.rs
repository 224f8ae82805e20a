// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// mirror CLI: bidirectional file-tree synchronizer across local,
// remote, and S3-compatible backends.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use mirror::{default_registry, BackendContext};
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "mirror",
    version,
    author,
    about = "Bidirectional file-tree synchronizer across local, remote, and S3-compatible backends"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose (debug-level) logging.
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the remote-backend server.
    Daemon {
        #[arg(long, default_value_t = 8123)]
        port: u16,

        #[arg(long, default_value = "")]
        host: String,

        #[arg(long, default_value_t = false)]
        insecure: bool,
    },

    /// One-shot or watched sync between two backends.
    Sync {
        #[arg(long)]
        src: String,

        #[arg(long)]
        dest: String,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        cert: Option<PathBuf>,

        #[arg(long)]
        key: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        insecure: bool,

        #[arg(long, default_value_t = false)]
        watch: bool,

        /// POSIX regex matched against each entry's relative path; may
        /// be repeated.
        #[arg(long = "exclude")]
        excludes: Vec<String>,
    },

    /// Single-file remote push.
    Remote {
        #[arg(long)]
        src: String,

        #[arg(long)]
        dest: String,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        cert: Option<PathBuf>,

        #[arg(long)]
        key: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        insecure: bool,
    },

    /// PKI management: CA/certificate lifecycle for the remote backend.
    Pki {
        #[arg(long, default_value_t = false)]
        configure: bool,

        #[arg(long, default_value = "localhost")]
        ca_host: String,

        /// `name:path` pair identifying the foreign CA to import.
        #[arg(long, value_name = "NAME:PATH")]
        import_ca: Option<String>,

        #[arg(long, default_value_t = false)]
        output_ca: bool,

        #[arg(long)]
        import_client_cert: Option<PathBuf>,

        #[arg(long)]
        import_client_key: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        output_client_cert: bool,

        #[arg(long, default_value_t = false)]
        output_client_key: bool,

        #[arg(long, default_value_t = false)]
        generate_cert: bool,

        #[arg(long, default_value_t = false)]
        remove_pki: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| filter.to_string()),
        ))
        .init();
}

fn progress_spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    bar.set_message(message.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(100));
    bar
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Daemon { port, host, insecure } => run_daemon(host, port, insecure).await,
        Commands::Sync {
            src,
            dest,
            host,
            port,
            cert,
            key,
            insecure,
            watch,
            excludes,
        } => run_sync(src, dest, host, port, cert, key, insecure, watch, excludes).await,
        Commands::Remote {
            src,
            dest,
            host,
            port,
            cert,
            key,
            insecure,
        } => run_sync(src, dest, host, port, cert, key, insecure, false, Vec::new()).await,
        Commands::Pki {
            configure,
            ca_host,
            import_ca,
            output_ca,
            import_client_cert,
            import_client_key,
            output_client_cert,
            output_client_key,
            generate_cert,
            remove_pki,
        } => run_pki(
            configure,
            ca_host,
            import_ca,
            output_ca,
            import_client_cert,
            import_client_key,
            output_client_cert,
            output_client_key,
            generate_cert,
            remove_pki,
        ),
    };

    if let Err(e) = result {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
    Ok(())
}

fn is_remote_scheme(scheme: &str) -> bool {
    matches!(scheme, "mirror" | "http" | "ssh")
}

fn parse_excludes(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("invalid --exclude pattern {p:?}")))
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn run_sync(
    src: String,
    dest: String,
    host: Option<String>,
    port: Option<u16>,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
    insecure: bool,
    watch: bool,
    excludes: Vec<String>,
) -> Result<()> {
    let config = mirror::config::SyncConfig {
        src: src.clone(),
        dest: dest.clone(),
        excludes: excludes.clone(),
        watch,
        insecure,
    };

    let registry = default_registry();
    let pki_config = mirror::config::PkiConfig::from_env(config.insecure);
    let pki = mirror::pki::Pki::new(pki_config.home.clone());
    let identity = match (&cert, &key) {
        (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
        _ => None,
    };
    let tls_client_config = pki.client_tls_config_with_identity(pki_config.insecure, identity).ok();

    let ctx = BackendContext {
        tls_client_config,
        tls_server_config: None,
        insecure: pki_config.insecure,
    };

    let mut src_url = mirror::MirrorUrl::parse(&config.src);
    let mut dest_url = mirror::MirrorUrl::parse(&config.dest);

    // --host/--port apply to whichever side is the remote-peer scheme
    // and doesn't already carry an authority in its URL.
    if let Some(host) = &host {
        let with_port = format!("{host}:{}", port.unwrap_or(8123));
        for url in [&mut src_url, &mut dest_url] {
            if is_remote_scheme(&url.scheme) && url.host.is_empty() {
                url.host = with_port.clone();
            }
        }
    }

    let spinner = progress_spinner(&format!("resolving {} and {}", config.src, config.dest));
    let src_fs: Arc<dyn mirror::FileSystem> = Arc::from(registry.resolve(&src_url, ctx.clone()).await?);
    let dst_fs: Arc<dyn mirror::FileSystem> = Arc::from(registry.resolve(&dest_url, ctx).await?);
    spinner.finish_and_clear();

    let options = mirror::SyncOptions {
        excludes: parse_excludes(&config.excludes)?,
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let outcome = if config.watch {
        println!("{} {} -> {}", "watching:".green().bold(), config.src, config.dest);
        mirror::sync::watch(src_fs, src_url.path, dst_fs, dest_url.path, options, cancel).await
    } else {
        println!("{} {} -> {}", "syncing:".green().bold(), config.src, config.dest);
        let result = mirror::sync::sync(src_fs, &src_url.path, dst_fs, &dest_url.path, &options, &cancel).await;
        if result.is_ok() {
            println!("{}", "sync complete".green());
        }
        result
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(mirror::MirrorError::Cancelled) => {
            println!("{}", "interrupted, stopping.".yellow());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_daemon(host: String, port: u16, insecure: bool) -> Result<()> {
    let bind_host = if host.is_empty() { "0.0.0.0" } else { &host };
    let addr = format!("{bind_host}:{port}");
    let pki_config = mirror::config::PkiConfig::from_env(insecure);
    let pki = mirror::pki::Pki::new(pki_config.home.clone());
    let tls_config = pki.server_tls_config(pki_config.insecure)?;
    let backend: Arc<dyn mirror::FileSystem> = Arc::new(mirror::backend::local::LocalBackend::new());
    let daemon = mirror::backend::remote::Daemon::new(backend, tls_config);

    println!("{} {}", "daemon listening on".green().bold(), addr);
    daemon.serve(&addr).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_pki(
    configure: bool,
    ca_host: String,
    import_ca: Option<String>,
    output_ca: bool,
    import_client_cert: Option<PathBuf>,
    import_client_key: Option<PathBuf>,
    output_client_cert: bool,
    output_client_key: bool,
    generate_cert: bool,
    remove_pki: bool,
) -> Result<()> {
    let pki_config = mirror::config::PkiConfig::from_env(false);
    let pki = mirror::pki::Pki::new(pki_config.home.clone());

    if configure {
        println!("{}", "setting up PKI...".green());
        pki.configure(&ca_host)?;
        println!("{}", "PKI setup complete.".green());
    }

    if generate_cert {
        pki.generate_client_cert(&["localhost".to_string()])?;
        println!("{}", "generated a fresh client certificate.".green());
    }

    if let Some(spec) = import_ca {
        let (name, path) = spec
            .split_once(':')
            .with_context(|| format!("--import-ca expects NAME:PATH, got {spec:?}"))?;
        pki.import_ca(name, std::path::Path::new(path))?;
        println!("{} {}", "imported CA:".green(), name);
    }

    if let (Some(cert), Some(key)) = (&import_client_cert, &import_client_key) {
        pki.import_client_cert(cert, key)?;
        println!("{}", "imported client certificate and key.".green());
    }

    if output_ca {
        println!("{}", std::fs::read_to_string(pki_config.home.join("ca/ca.pem"))?);
    }
    if output_client_cert {
        println!("{}", std::fs::read_to_string(pki_config.home.join("certs/cert.pem"))?);
    }
    if output_client_key {
        println!("{}", std::fs::read_to_string(pki_config.home.join("certs/cert-key.pem"))?);
    }

    if remove_pki {
        println!("{}", "removing existing PKI...".yellow());
        pki.remove()?;
        println!("{}", "PKI removal complete.".green());
    }

    Ok(())
}
