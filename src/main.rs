use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sitehost::assets::{AssetFs, DirAssets, EmbeddedAssets};
use sitehost::config::Config;
use sitehost::registry::{Registry, RegistryOptions};
use sitehost::server::SiteServer;
use sitehost::tls::{self, CertificateProvider, StaticCertificate};
use sitehost::{PKG_NAME, VERSION};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "sitehost", version, about = "Serve static sites straight from git branches")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the web server
    Start(StartArgs),
    /// Print the version
    Version,
}

#[derive(Args, Debug)]
struct StartArgs {
    /// TOML configuration file
    #[arg(short, long, env = "SITEHOST_CONFIG", value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// HTTP listen address, e.g. :4200
    #[arg(short = 'l', long, env = "SITEHOST_LISTEN_HTTP")]
    listen_http: Option<String>,

    /// HTTPS listen address, e.g. :4443
    #[arg(short = 's', long, env = "SITEHOST_LISTEN_HTTPS")]
    listen_https: Option<String>,

    /// Directory for the registry and site clones
    #[arg(short = 'd', long, env = "SITEHOST_DATA_DIR", value_hint = clap::ValueHint::DirPath)]
    data_dir: Option<String>,

    /// Host the admin UI and API answer on
    #[arg(short = 'w', long, env = "SITEHOST_WILDCARD")]
    wildcard: Option<String>,

    /// Admin API username
    #[arg(short = 'u', long, env = "SITEHOST_ADMIN_USERNAME")]
    admin_username: Option<String>,

    /// Admin API password
    #[arg(short = 'p', long, env = "SITEHOST_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,
}

impl StartArgs {
    /// Load the config file (if any) and apply flag overrides on top
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => Config::default(),
        };

        let server = &mut config.server;
        if let Some(listen_http) = self.listen_http {
            server.listen_http = listen_http;
        }
        if self.listen_https.is_some() {
            server.listen_https = self.listen_https;
        }
        if let Some(data_dir) = self.data_dir {
            server.data_dir = data_dir;
        }
        if let Some(wildcard) = self.wildcard {
            server.wildcard = wildcard;
        }
        if self.admin_username.is_some() {
            server.admin_username = self.admin_username;
        }
        if self.admin_password.is_some() {
            server.admin_password = self.admin_password;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sitehost=debug".parse().expect("valid log directive")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("{PKG_NAME} {VERSION}");
            Ok(())
        }
        Command::Start(args) => start(args).await,
    }
}

async fn start(args: StartArgs) -> anyhow::Result<()> {
    let config = args.into_config().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    let server = &config.server;

    let assets: Arc<dyn AssetFs> = match &server.assets_dir {
        Some(dir) => {
            info!(path = %dir, "Serving admin UI from directory");
            Arc::new(DirAssets::new(dir))
        }
        None => Arc::new(EmbeddedAssets),
    };

    let data_dir = server.data_dir();
    let options = RegistryOptions {
        data_dir: data_dir.clone(),
        wildcard: server.wildcard.clone(),
        admin: server.admin_credentials(),
        assets: Some(assets),
        sync_interval: server.sync_interval(),
    };
    let registry = Registry::new(options)
        .await
        .with_context(|| format!("Failed to load site registry from {}", data_dir.display()))?;

    info!(
        version = VERSION,
        wildcard = %registry.wildcard(),
        data_dir = %data_dir.display(),
        sites = registry.len(),
        admin_auth = server.admin_credentials().is_some(),
        "Starting {}", PKG_NAME
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let restart_delay = server.restart_delay();

    let http_addr = server.listen_http_addr()?;
    let http_handle = tokio::spawn(run_with_restart(
        http_addr,
        Arc::clone(&registry),
        None,
        shutdown_rx.clone(),
        restart_delay,
    ));

    let https_handle = match server.listen_https_addr()? {
        Some(addr) => {
            let provider: Arc<dyn CertificateProvider> = match (&server.tls_cert, &server.tls_key) {
                (Some(cert), Some(key)) => Arc::new(
                    StaticCertificate::from_pem_files(Path::new(cert), Path::new(key))
                        .context("Failed to load TLS certificate")?,
                ),
                _ => {
                    warn!(wildcard = %registry.wildcard(), "No TLS certificate configured, using a self-signed one");
                    Arc::new(StaticCertificate::self_signed(vec![registry.wildcard().to_string()])?)
                }
            };
            Some(tokio::spawn(run_with_restart(
                addr,
                Arc::clone(&registry),
                Some(tls::acceptor(provider)),
                shutdown_rx.clone(),
                restart_delay,
            )))
        }
        None => None,
    };

    wait_for_shutdown_signal().await?;

    let _ = shutdown_tx.send(true);

    info!("Stopping site synchronizers...");
    registry.shutdown();

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = http_handle.await;
        if let Some(handle) = https_handle {
            let _ = handle.await;
        }
    })
    .await;

    info!("Shutdown complete");
    Ok(())
}

/// Run a listener, restarting it after `delay` whenever it fails
async fn run_with_restart(
    addr: SocketAddr,
    registry: Arc<Registry>,
    tls_acceptor: Option<TlsAcceptor>,
    mut shutdown_rx: watch::Receiver<bool>,
    delay: Duration,
) {
    loop {
        let mut server = SiteServer::new(addr, Arc::clone(&registry), shutdown_rx.clone());
        if let Some(acceptor) = &tls_acceptor {
            server = server.with_tls(acceptor.clone());
        }
        let tls = server.tls_enabled();

        match server.run().await {
            Ok(()) => return,
            Err(e) => error!(addr = %addr, tls, error = %e, "Site server exited"),
        }

        if *shutdown_rx.borrow() {
            return;
        }
        info!(addr = %addr, delay_secs = delay.as_secs(), "Restarting site server");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => return,
        }
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}
