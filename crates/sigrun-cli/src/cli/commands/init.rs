//! `sigrun init` - Create the genesis record of a chain.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use sigrun_core::{
    generate_keypair, guid_for_genesis, FsChainStore, KeyPairConfig, KeylessConfig, TrustConfig,
};

use super::{new_passphrase, EXIT_SUCCESS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Keypair,
    Keyless,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Chain directory
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Chain name
    #[arg(long)]
    pub name: String,

    /// Image the chain vouches for (repeatable)
    #[arg(long = "image")]
    pub images: Vec<String>,

    /// Config mode
    #[arg(long, value_enum, default_value_t = ModeArg::Keypair)]
    pub mode: ModeArg,

    /// Maintainer identity for keyless chains (repeatable)
    #[arg(long = "maintainer")]
    pub maintainers: Vec<String>,

    /// Existing SPKI PEM public key (requires --private-key)
    #[arg(long, requires = "private_key")]
    pub public_key: Option<PathBuf>,

    /// Existing PKCS#8 PEM private key (requires --public-key)
    #[arg(long, requires = "public_key")]
    pub private_key: Option<PathBuf>,

    /// Passphrase for a generated key (prompted when unset, empty for none)
    #[arg(long, env = "SIGRUN_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,
}

pub async fn run(args: InitArgs) -> Result<i32> {
    let store = FsChainStore::new(&args.dir);
    let mut config = build_config(&args)?;

    config
        .initialize_repository(&store)
        .await
        .with_context(|| format!("failed to initialize {}", args.dir.display()))?;

    let guid = guid_for_genesis(&config)?;
    println!("Initialized chain {} in {}", config.name(), args.dir.display());
    println!("guid: {}", guid);

    Ok(EXIT_SUCCESS)
}

fn build_config(args: &InitArgs) -> Result<TrustConfig> {
    if args.mode == ModeArg::Keyless {
        return Ok(KeylessConfig {
            name: args.name.clone(),
            chain_no: 0,
            maintainers: args.maintainers.clone(),
            images: args.images.clone(),
            signature: String::new(),
        }
        .into());
    }

    let (public_key, private_key) = match (&args.public_key, &args.private_key) {
        (Some(public_path), Some(private_path)) => (
            std::fs::read_to_string(public_path)
                .with_context(|| format!("failed to read {}", public_path.display()))?,
            std::fs::read_to_string(private_path)
                .with_context(|| format!("failed to read {}", private_path.display()))?,
        ),
        _ => {
            let passphrase = new_passphrase(args.passphrase.as_deref())?;
            let keys = generate_keypair(&passphrase)?;
            (keys.public_key_pem, keys.private_key_pem)
        }
    };

    Ok(KeyPairConfig::new(&args.name, public_key)
        .with_private_key(private_key)
        .with_images(args.images.iter().cloned())
        .into())
}
