//! `sigrun check` - Evaluate images the way the admission webhook does.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use sigrun_core::{
    AdmissionController, Decision, DirSignatureSource, Ed25519Backend, FileRegistrySource,
    HttpOptions, HttpSignatureSource, RegistrySource, SignatureSource, TrustRegistry,
};

use super::EXIT_SUCCESS;

/// Shares the exit code of trust failures.
pub const EXIT_DENIED: i32 = 4;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Image references as they appear in a pod spec
    #[arg(required = true)]
    pub images: Vec<String>,

    /// Registry snapshot file
    #[arg(long, env = "SIGRUN_REGISTRY_FILE")]
    pub registry: PathBuf,

    /// Signature directory
    #[arg(long, conflicts_with = "signature_url")]
    pub signatures: Option<PathBuf>,

    /// Signature store base URL
    #[arg(long)]
    pub signature_url: Option<String>,

    /// Signature lookup timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

pub async fn run(args: CheckArgs) -> Result<i32> {
    let registry_source: Arc<dyn RegistrySource> =
        Arc::new(FileRegistrySource::new(&args.registry));
    let registry = TrustRegistry::load(registry_source)
        .await
        .with_context(|| format!("failed to load registry {}", args.registry.display()))?;

    let backend = match signature_source(&args)? {
        Some(source) => Ed25519Backend::with_source(source),
        None => Ed25519Backend::new(),
    };
    let controller = AdmissionController::new(registry, Arc::new(backend));

    match controller.evaluate_images(&args.images).await {
        Decision::Allow => {
            println!("✅ allowed: {}", args.images.join(", "));
            Ok(EXIT_SUCCESS)
        }
        Decision::Deny { reason } => {
            println!("❌ denied: {}", reason);
            Ok(EXIT_DENIED)
        }
    }
}

fn signature_source(args: &CheckArgs) -> Result<Option<Arc<dyn SignatureSource>>> {
    if let Some(dir) = &args.signatures {
        return Ok(Some(Arc::new(DirSignatureSource::new(dir))));
    }
    if let Some(url) = &args.signature_url {
        let options = HttpOptions::default().with_timeout_secs(args.timeout);
        let source = HttpSignatureSource::new(url, &options)?;
        return Ok(Some(Arc::new(source)));
    }
    Ok(None)
}
