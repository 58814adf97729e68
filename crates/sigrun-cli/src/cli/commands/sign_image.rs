//! `sigrun sign-image` - Publish image signatures made with the current key.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use sigrun_core::{
    ChainReader, DirSignatureSource, Ed25519Backend, FsChainStore, ImageInfo, TrustConfig,
    TrustError,
};

use super::{unlock_passphrase, EXIT_SUCCESS};

#[derive(Args, Debug)]
pub struct SignImageArgs {
    /// Images to sign; defaults to every image of the current record
    pub images: Vec<String>,

    /// Chain directory
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Signature directory
    #[arg(long)]
    pub out: PathBuf,

    /// Passphrase of the current key (prompted when needed)
    #[arg(long, env = "SIGRUN_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,
}

pub async fn run(args: SignImageArgs) -> Result<i32> {
    let store = FsChainStore::new(&args.dir);
    let head = store
        .fetch_current()
        .await
        .with_context(|| format!("failed to load current record from {}", args.dir.display()))?;

    let private_key = signing_key(&head).with_context(|| {
        format!("cannot sign with {}", store.current_path().display())
    })?;
    let targets = select_images(&head, &args.images)?;
    let passphrase = unlock_passphrase(&private_key, args.passphrase.as_deref())?;

    let backend = Ed25519Backend::new();
    let source = DirSignatureSource::new(&args.out);
    for image in &targets {
        let envelope = backend.sign_image(image, &private_key, &passphrase)?;
        let path = source.write_signature(image, &envelope).await?;
        println!("signed {} -> {}", image, path.display());
    }

    Ok(EXIT_SUCCESS)
}

/// Private key of a keypair head. Keyless heads have no signing path yet.
fn signing_key(head: &TrustConfig) -> Result<String> {
    match head {
        TrustConfig::Keypair(c) => c.private_key.clone().context("record holds no private key"),
        TrustConfig::Keyless(_) => Err(TrustError::NotImplemented {
            mode: "keyless",
            operation: "image signing",
        }
        .into()),
    }
}

/// Images to sign, each checked against the repositories the record lists.
fn select_images(head: &TrustConfig, requested: &[String]) -> Result<Vec<ImageInfo>> {
    let listed = head.image_repositories()?;
    let raw: Vec<&String> = if requested.is_empty() {
        head.images().iter().collect()
    } else {
        requested.iter().collect()
    };

    let mut selected = Vec::with_capacity(raw.len());
    for image in raw {
        let info = ImageInfo::parse(image)?;
        if !listed.contains(&info.repository()) {
            anyhow::bail!(
                "{} is not listed in chain {}",
                info.repository(),
                head.name()
            );
        }
        selected.push(info);
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::exit_code_for;
    use sigrun_core::{KeyPairConfig, KeylessConfig};

    fn head() -> TrustConfig {
        KeyPairConfig::new("acme", "PEM")
            .with_images(["ghcr.io/acme/app", "ghcr.io/acme/worker"])
            .into()
    }

    #[test]
    fn test_defaults_to_all_listed_images() {
        let selected = select_images(&head(), &[]).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].to_string(), "ghcr.io/acme/app:latest");
    }

    #[test]
    fn test_refuses_unlisted_image() {
        let err = select_images(&head(), &["ghcr.io/other/app:v1".to_string()]).unwrap_err();
        assert!(err.to_string().contains("not listed"));
    }

    #[test]
    fn test_keeps_requested_tag() {
        let selected = select_images(&head(), &["ghcr.io/acme/app:v2".to_string()]).unwrap();
        assert_eq!(selected[0].tag, "v2");
    }

    #[test]
    fn test_keyless_head_is_not_implemented() {
        let keyless: TrustConfig = KeylessConfig {
            name: "acme".to_string(),
            chain_no: 0,
            maintainers: vec!["alice@example.com".to_string()],
            images: vec!["ghcr.io/acme/app".to_string()],
            signature: String::new(),
        }
        .into();

        let err = signing_key(&keyless).unwrap_err();
        assert_eq!(exit_code_for(&err), 7);
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn test_keypair_head_without_private_key() {
        let err = signing_key(&head()).unwrap_err();
        assert_eq!(exit_code_for(&err), 1);
        assert!(err.to_string().contains("no private key"));
    }
}
