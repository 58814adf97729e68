//! `sigrun registry` - Maintain the registry snapshot read by the webhook.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use sigrun_core::{Ed25519Backend, FileRegistrySource, RegistrySnapshot};

use super::{open_reader, EXIT_SUCCESS};

#[derive(Args, Debug)]
pub struct RegistryArgs {
    /// Registry snapshot file
    #[arg(long, env = "SIGRUN_REGISTRY_FILE", default_value = "registry.json")]
    pub file: PathBuf,

    #[command(subcommand)]
    pub cmd: RegistryCommand,
}

#[derive(Subcommand, Debug)]
pub enum RegistryCommand {
    /// Register a chain on first use
    Add {
        /// Chain directory or http(s) URL
        location: String,

        /// Fetch timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Advance a registered chain to its published head
    Update {
        guid: String,

        /// Fetch from here instead of the registered location
        #[arg(long)]
        location: Option<String>,

        /// Fetch timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Unregister a chain
    Remove { guid: String },
    /// List registered chains
    List {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(args: RegistryArgs) -> Result<i32> {
    let source = FileRegistrySource::new(&args.file);
    let snapshot = source
        .fetch_or_empty()
        .await
        .with_context(|| format!("failed to read registry {}", args.file.display()))?;
    let backend = Ed25519Backend::new();

    let next = match args.cmd {
        RegistryCommand::Add { location, timeout } => {
            let reader = open_reader(&location, timeout)?;
            let (guid, next) = snapshot
                .add_repository(reader.as_ref(), &backend)
                .await
                .with_context(|| format!("failed to register {}", location))?;
            println!("registered {} as {}", location, guid);
            next
        }
        RegistryCommand::Update {
            guid,
            location,
            timeout,
        } => {
            let location = match location {
                Some(location) => location,
                None => snapshot
                    .repo(&guid)
                    .map(|entry| entry.path.clone())
                    .with_context(|| format!("repository {} is not registered", guid))?,
            };
            let reader = open_reader(&location, timeout)?;
            let next = snapshot
                .update_repository(&guid, reader.as_ref(), &backend)
                .await
                .with_context(|| format!("failed to update {}", guid))?;
            if let Some(entry) = next.repo(&guid) {
                println!(
                    "updated {} to record {}",
                    guid, entry.verification_info.chain_no
                );
            }
            next
        }
        RegistryCommand::Remove { guid } => {
            let next = snapshot.without_repo(&guid)?;
            println!("removed {}", guid);
            next
        }
        RegistryCommand::List { json } => {
            print_snapshot(&snapshot, json)?;
            return Ok(EXIT_SUCCESS);
        }
    };

    source
        .store_snapshot(&next)
        .await
        .with_context(|| format!("failed to write registry {}", args.file.display()))?;
    Ok(EXIT_SUCCESS)
}

fn print_snapshot(snapshot: &RegistrySnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    if snapshot.is_empty() {
        println!("no repositories registered");
        return Ok(());
    }

    for (guid, entry) in &snapshot.guid_to_repo {
        let info = &entry.verification_info;
        println!("{}", guid);
        println!("  name:   {}", info.name);
        println!("  mode:   {}", info.mode);
        println!("  record: {}", info.chain_no);
        println!("  path:   {}", entry.path);
        println!("  images: {}", info.images.join(", "));
    }
    Ok(())
}
