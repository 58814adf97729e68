use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sigrun_core::{
    AdmissionController, ControllerConfig, DirSignatureSource, Ed25519Backend, FileRegistrySource,
    HttpSignatureSource, RegistrySource, SignatureSource, TrustRegistry,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod server;

/// Admission webhook arguments. Unset flags fall back to `SIGRUN_*` variables.
#[derive(Parser, Debug)]
#[command(name = "sigrun-controller", version, about, long_about = None)]
struct Args {
    /// Listen address
    #[arg(short, long)]
    bind: Option<String>,

    /// Registry snapshot file
    #[arg(long)]
    registry_file: Option<PathBuf>,

    /// Signature store base URL
    #[arg(long, conflicts_with = "signature_dir")]
    signature_url: Option<String>,

    /// Signature directory
    #[arg(long)]
    signature_dir: Option<PathBuf>,

    /// Registry refresh interval in seconds, 0 disables refresh
    #[arg(long)]
    refresh_secs: Option<u64>,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> ControllerConfig {
        let mut config = ControllerConfig::from_env();
        if let Some(bind) = self.bind {
            config = config.with_bind(bind);
        }
        if let Some(path) = self.registry_file {
            config = config.with_registry_file(path);
        }
        if let Some(url) = self.signature_url {
            config.signature_dir = None;
            config = config.with_signature_url(url);
        }
        if let Some(dir) = self.signature_dir {
            config.signature_url = None;
            config = config.with_signature_dir(dir);
        }
        if let Some(secs) = self.refresh_secs {
            config = config.with_refresh_secs(secs);
        }
        config.log_json |= self.log_json;
        config
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn signature_source(config: &ControllerConfig) -> Result<Option<Arc<dyn SignatureSource>>> {
    if let Some(url) = &config.signature_url {
        let source = HttpSignatureSource::new(url, &config.http_options())
            .context("failed to create signature client")?;
        return Ok(Some(Arc::new(source)));
    }
    if let Some(dir) = &config.signature_dir {
        return Ok(Some(Arc::new(DirSignatureSource::new(dir))));
    }
    Ok(None)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config();
    init_logging(config.log_json);
    config.validate()?;

    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.bind))?;

    let registry_source: Arc<dyn RegistrySource> =
        Arc::new(FileRegistrySource::new(&config.registry_file));
    let registry = TrustRegistry::load(registry_source).await.with_context(|| {
        format!(
            "failed to load trust registry from {}",
            config.registry_file.display()
        )
    })?;

    let _refresh = config
        .refresh_interval()
        .map(|interval| registry.spawn_refresh(interval));

    let backend = match signature_source(&config)? {
        Some(source) => Ed25519Backend::with_source(source),
        None => {
            warn!("no signature store configured, claimed images will be denied");
            Ed25519Backend::new()
        }
    };
    let controller = AdmissionController::new(registry, Arc::new(backend));

    server::serve(addr, controller, shutdown_signal())
        .await
        .context("admission webhook failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_flags_override_environment_defaults() {
        let args = Args::try_parse_from([
            "sigrun-controller",
            "--bind",
            "127.0.0.1:9443",
            "--registry-file",
            "/tmp/registry.json",
            "--signature-dir",
            "/tmp/sigs",
            "--refresh-secs",
            "0",
        ])
        .unwrap();

        let config = args.into_config();
        assert_eq!(config.bind, "127.0.0.1:9443");
        assert_eq!(config.registry_file, PathBuf::from("/tmp/registry.json"));
        assert_eq!(config.signature_dir, Some(PathBuf::from("/tmp/sigs")));
        assert!(config.signature_url.is_none());
        assert!(config.refresh_interval().is_none());
    }

    #[test]
    fn test_signature_dir_source() {
        let config = ControllerConfig::default().with_signature_dir("/tmp/sigs");
        assert!(signature_source(&config).unwrap().is_some());
        assert!(signature_source(&ControllerConfig::default())
            .unwrap()
            .is_none());
    }
}
