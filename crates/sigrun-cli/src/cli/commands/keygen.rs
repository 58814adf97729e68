//! `sigrun keygen` - Generate an ed25519 keypair.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use sigrun_core::generate_keypair;

use super::{new_passphrase, EXIT_SUCCESS};

pub const PRIVATE_KEY_FILE: &str = "private_key.pem";
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Output directory for keypair files
    #[arg(long, default_value = ".")]
    pub out: PathBuf,

    /// Force overwrite existing files
    #[arg(long, short)]
    pub force: bool,

    /// Passphrase for the private key (prompted when unset, empty for none)
    #[arg(long, env = "SIGRUN_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,
}

pub fn run(args: KeygenArgs) -> Result<i32> {
    if !args.out.exists() {
        fs::create_dir_all(&args.out)
            .with_context(|| format!("failed to create directory: {}", args.out.display()))?;
    }

    let private_path = args.out.join(PRIVATE_KEY_FILE);
    let public_path = args.out.join(PUBLIC_KEY_FILE);

    if !args.force {
        for path in [&private_path, &public_path] {
            if path.exists() {
                anyhow::bail!(
                    "key already exists: {} (use --force to overwrite)",
                    path.display()
                );
            }
        }
    }

    let passphrase = new_passphrase(args.passphrase.as_deref())?;
    let keys = generate_keypair(&passphrase)?;

    write_private_key(&private_path, &keys.private_key_pem)?;
    fs::write(&public_path, &keys.public_key_pem)
        .with_context(|| format!("failed to write public key: {}", public_path.display()))?;

    let encryption = if passphrase.is_empty() {
        "unencrypted"
    } else {
        "encrypted"
    };
    println!("Generated ed25519 keypair:");
    println!(
        "  Private key: {} (PKCS#8 PEM, {}, mode 0600)",
        private_path.display(),
        encryption
    );
    println!("  Public key:  {} (SPKI PEM)", public_path.display());
    println!();
    println!("key_id: {}", keys.key_id);

    Ok(EXIT_SUCCESS)
}

/// Write a private key readable by the owner only.
pub fn write_private_key(path: &Path, pem: &str) -> Result<()> {
    fs::write(path, pem.as_bytes())
        .with_context(|| format!("failed to write private key: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on: {}", path.display()))?;
    }

    Ok(())
}
