//! `sigrun verify` and `sigrun guid`.

use anyhow::{Context, Result};
use clap::Args;
use sigrun_core::{compute_guid, verify_chain, verify_repository, Ed25519Backend};

use super::{open_reader, EXIT_SUCCESS};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Chain directory or http(s) URL
    #[arg(default_value = ".")]
    pub location: String,

    /// Trust the record at this position instead of genesis
    #[arg(long)]
    pub from: Option<i64>,

    /// Fetch timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

#[derive(Args, Debug)]
pub struct GuidArgs {
    /// Chain directory or http(s) URL
    #[arg(default_value = ".")]
    pub location: String,

    /// Fetch timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

pub async fn run(args: VerifyArgs) -> Result<i32> {
    let reader = open_reader(&args.location, args.timeout)?;
    let backend = Ed25519Backend::new();

    match args.from {
        None => {
            let verified = verify_repository(reader.as_ref(), &backend)
                .await
                .with_context(|| format!("verification of {} failed", args.location))?;
            println!("✅ chain {} verified", verified.head.name());
            println!("guid: {}", verified.guid);
            println!("head: {}", verified.head.chain_no());
        }
        Some(position) => {
            let trusted = reader.fetch(position).await?;
            let head = reader.fetch_current().await?;
            verify_chain(reader.as_ref(), &trusted, &head, &backend)
                .await
                .with_context(|| format!("verification of {} failed", args.location))?;
            let guid = compute_guid(reader.as_ref()).await?;
            println!(
                "✅ chain {} verified from {} to {}",
                head.name(),
                position,
                head.chain_no()
            );
            println!("guid: {}", guid);
            println!("head: {}", head.chain_no());
        }
    }

    Ok(EXIT_SUCCESS)
}

pub async fn run_guid(args: GuidArgs) -> Result<i32> {
    let reader = open_reader(&args.location, args.timeout)?;
    let guid = compute_guid(reader.as_ref())
        .await
        .with_context(|| format!("failed to read genesis from {}", args.location))?;
    println!("{}", guid);
    Ok(EXIT_SUCCESS)
}
