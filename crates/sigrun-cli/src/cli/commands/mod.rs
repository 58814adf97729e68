pub mod check;
pub mod commit;
pub mod init;
pub mod keygen;
pub mod registry;
pub mod sign_image;
pub mod verify;

use anyhow::Context;
use dialoguer::Password;
use sigrun_core::{ChainReader, FsChainStore, HttpChainReader, HttpOptions, TrustError};
use tracing::debug;

use super::args::{Cli, Command};

pub const EXIT_SUCCESS: i32 = 0;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Keygen(args) => keygen::run(args),
        Command::Init(args) => init::run(args).await,
        Command::Commit(args) => commit::run(args).await,
        Command::Verify(args) => verify::run(args).await,
        Command::Guid(args) => verify::run_guid(args).await,
        Command::SignImage(args) => sign_image::run(args).await,
        Command::Check(args) => check::run(args).await,
        Command::Registry(args) => registry::run(args).await,
    }
}

/// Exit code of the first [`TrustError`] in the chain, 1 otherwise.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<TrustError>())
        .map(TrustError::exit_code)
        .unwrap_or(1)
}

/// Chain reader for a directory or an `http(s)://` URL.
pub fn open_reader(location: &str, timeout_secs: u64) -> anyhow::Result<Box<dyn ChainReader>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        debug!(location, timeout_secs, "opening remote chain");
        let options = HttpOptions::default().with_timeout_secs(timeout_secs);
        let reader = HttpChainReader::new(location, &options)
            .with_context(|| format!("failed to open {}", location))?;
        Ok(Box::new(reader))
    } else {
        Ok(Box::new(FsChainStore::new(location)))
    }
}

/// Passphrase unlocking `private_key`.
///
/// Uses `provided` when set; prompts only when the key is encrypted.
pub fn unlock_passphrase(private_key: &str, provided: Option<&str>) -> anyhow::Result<String> {
    if let Some(passphrase) = provided {
        return Ok(passphrase.to_string());
    }
    if !private_key.contains("ENCRYPTED PRIVATE KEY") {
        return Ok(String::new());
    }
    Password::new()
        .with_prompt("Passphrase for the current signing key")
        .interact()
        .context("failed to read passphrase")
}

/// Passphrase protecting a newly generated key. Empty leaves it unencrypted.
pub fn new_passphrase(provided: Option<&str>) -> anyhow::Result<String> {
    if let Some(passphrase) = provided {
        return Ok(passphrase.to_string());
    }
    Password::new()
        .with_prompt("Passphrase for the new key (empty for none)")
        .with_confirmation("Repeat passphrase", "Passphrases do not match")
        .allow_empty_password(true)
        .interact()
        .context("failed to read passphrase")
}
