//! `sigrun commit` - Append a successor record signed by the current key.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use sigrun_core::{
    generate_keypair, ChainReader, Ed25519Backend, FsChainStore, ImageInfo, TrustConfig,
};

use super::{new_passphrase, unlock_passphrase, EXIT_SUCCESS};

#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Chain directory
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Rename the chain
    #[arg(long)]
    pub name: Option<String>,

    /// Image to add (repeatable)
    #[arg(long)]
    pub add_image: Vec<String>,

    /// Image to remove (repeatable)
    #[arg(long)]
    pub remove_image: Vec<String>,

    /// Generate a new keypair for the successor
    #[arg(long, conflicts_with_all = ["public_key", "private_key"])]
    pub rotate_key: bool,

    /// Successor public key (requires --private-key)
    #[arg(long, requires = "private_key")]
    pub public_key: Option<PathBuf>,

    /// Successor private key (requires --public-key)
    #[arg(long, requires = "public_key")]
    pub private_key: Option<PathBuf>,

    /// Passphrase of the current key (prompted when needed)
    #[arg(long, env = "SIGRUN_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Passphrase for a rotated key (prompted when unset, empty for none)
    #[arg(long, env = "SIGRUN_NEW_PASSPHRASE", hide_env_values = true)]
    pub new_passphrase: Option<String>,
}

pub async fn run(args: CommitArgs) -> Result<i32> {
    let store = FsChainStore::new(&args.dir);
    let head = store
        .fetch_current()
        .await
        .with_context(|| format!("failed to load current record from {}", args.dir.display()))?;

    let mut next = apply_changes(&head, &args)?;

    let current_key = match &head {
        TrustConfig::Keypair(c) => c.private_key.clone().unwrap_or_default(),
        TrustConfig::Keyless(_) => String::new(),
    };
    let passphrase = unlock_passphrase(&current_key, args.passphrase.as_deref())?;

    let backend = Ed25519Backend::new();
    next.commit_repository_update(&store, &backend, &passphrase)
        .await
        .context("commit failed")?;

    println!(
        "Committed record {} of {} (signed by record {})",
        next.chain_no(),
        next.name(),
        head.chain_no()
    );
    Ok(EXIT_SUCCESS)
}

fn apply_changes(head: &TrustConfig, args: &CommitArgs) -> Result<TrustConfig> {
    let mut next = head.clone();

    let images = match &mut next {
        TrustConfig::Keypair(c) => {
            if let Some(name) = &args.name {
                c.name = name.clone();
            }
            &mut c.images
        }
        TrustConfig::Keyless(c) => {
            if let Some(name) = &args.name {
                c.name = name.clone();
            }
            &mut c.images
        }
    };

    for image in &args.remove_image {
        let target = repository_of(image)?;
        let before = images.len();
        images.retain(|existing| repository_of(existing).ok().as_deref() != Some(target.as_str()));
        if images.len() == before {
            anyhow::bail!("image {} is not listed in the current record", image);
        }
    }

    for image in &args.add_image {
        let target = repository_of(image)?;
        let listed = images
            .iter()
            .any(|existing| repository_of(existing).ok().as_deref() == Some(target.as_str()));
        if !listed {
            images.push(image.clone());
        }
    }

    if let TrustConfig::Keypair(c) = &mut next {
        if args.rotate_key {
            let passphrase = new_passphrase(args.new_passphrase.as_deref())?;
            let keys = generate_keypair(&passphrase)?;
            c.public_key = keys.public_key_pem;
            c.private_key = Some(keys.private_key_pem);
        } else if let (Some(public_path), Some(private_path)) = (&args.public_key, &args.private_key)
        {
            c.public_key = std::fs::read_to_string(public_path)
                .with_context(|| format!("failed to read {}", public_path.display()))?;
            c.private_key = Some(
                std::fs::read_to_string(private_path)
                    .with_context(|| format!("failed to read {}", private_path.display()))?,
            );
        }
    }

    Ok(next)
}

fn repository_of(image: &str) -> Result<String> {
    Ok(ImageInfo::parse(image)?.repository())
}
