use clap::{Parser, Subcommand};

use super::commands::{check, commit, init, keygen, registry, sign_image, verify};

#[derive(Parser)]
#[command(
    name = "sigrun",
    version,
    about = "Signing-key lineage and signed-image admission for container workloads"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate an ed25519 keypair
    Keygen(keygen::KeygenArgs),
    /// Create the genesis record of a new chain
    Init(init::InitArgs),
    /// Append a new record signed by the current key
    Commit(commit::CommitArgs),
    /// Verify a chain from genesis (or a trusted position) to its head
    Verify(verify::VerifyArgs),
    /// Print the GUID of a chain
    Guid(verify::GuidArgs),
    /// Sign images with the current key into a signature directory
    SignImage(sign_image::SignImageArgs),
    /// Evaluate images against a registry as the admission controller would
    Check(check::CheckArgs),
    /// Maintain the trust registry
    Registry(registry::RegistryArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_registry_add() {
        let cli = Cli::try_parse_from([
            "sigrun",
            "registry",
            "--file",
            "/tmp/registry.json",
            "add",
            "https://example.com/chains/acme",
        ])
        .unwrap();
        assert!(matches!(cli.cmd, Command::Registry(_)));
    }

    #[test]
    fn test_parse_commit_flags() {
        let cli = Cli::try_parse_from([
            "sigrun",
            "commit",
            "--dir",
            "chain",
            "--add-image",
            "ghcr.io/acme/worker",
            "--rotate-key",
        ])
        .unwrap();
        match cli.cmd {
            Command::Commit(args) => {
                assert_eq!(args.add_image, vec!["ghcr.io/acme/worker"]);
                assert!(args.rotate_key);
            }
            _ => panic!("expected commit"),
        }
    }
}
