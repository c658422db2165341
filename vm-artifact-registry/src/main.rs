//! Standalone artifact registry binary
//!
//! `start` serves the HTTP wire protocol; the other commands run the same
//! operations directly against the configured repositories without a server.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vm_artifact_registry::auth::Identity;
use vm_artifact_registry::logging::init_logging;
use vm_artifact_registry::{run_server, ArtifactService, Collaborators, Config};

#[derive(Parser)]
#[command(name = "artifact-registry")]
#[command(about = "Maven-style artifact repository with mirror fallback")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file; defaults apply when it does not exist
    #[arg(long, default_value = "registry.json", global = true)]
    config: PathBuf,

    /// Identity to act as for deploy and delete
    #[arg(long, global = true)]
    identity: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the artifact registry server
    Start {
        /// Host to bind to, overrides the configuration
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to, overrides the configuration
        #[arg(long)]
        port: Option<u16>,

        /// Data directory, overrides the configuration
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Deploy a local file into a repository
    Deploy {
        repository: String,
        /// Repository path, e.g. com/example/lib/1.0/lib-1.0.jar
        path: String,
        file: PathBuf,
    },

    /// Fetch an artifact or index document, consulting mirrors on a miss
    Fetch {
        repository: String,
        path: String,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Delete a file or directory from a repository
    Delete { repository: String, path: String },

    /// Print the versions of an artifact, oldest first
    Versions {
        repository: String,
        /// Artifact path, e.g. com/example/lib
        artifact: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    init_logging(&config.logging)?;

    let identity = cli.identity.map(Identity::new);

    match cli.command {
        Commands::Start { host, port, data } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data) = data {
                config.storage.data_dir = data;
            }
            run_server(config).await
        }

        Commands::Deploy {
            repository,
            path,
            file,
        } => {
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let service = ArtifactService::new(config, Collaborators::default()).await?;
            let details = service
                .deploy(identity.as_ref(), &repository, &path, Bytes::from(content))
                .await?;
            println!(
                "Deployed {repository}/{path} ({} bytes)",
                details.content_length
            );
            Ok(())
        }

        Commands::Fetch {
            repository,
            path,
            output,
        } => {
            let service = ArtifactService::new(config, Collaborators::default()).await?;
            let resolved = service.lookup(identity.as_ref(), &repository, &path).await?;
            match (resolved.content, output) {
                (Some(content), Some(output)) => {
                    tokio::fs::write(&output, &content)
                        .await
                        .with_context(|| format!("Failed to write {}", output.display()))?;
                    println!("Saved {repository}/{path} to {}", output.display());
                }
                (Some(content), None) => {
                    use std::io::Write;
                    std::io::stdout().write_all(&content)?;
                }
                (None, _) => {
                    for entry in service.list(identity.as_ref(), &repository, &path).await? {
                        println!("{}", entry.name);
                    }
                }
            }
            Ok(())
        }

        Commands::Delete { repository, path } => {
            let service = ArtifactService::new(config, Collaborators::default()).await?;
            service.delete(identity.as_ref(), &repository, &path).await?;
            println!("Deleted {repository}/{path}");
            Ok(())
        }

        Commands::Versions {
            repository,
            artifact,
        } => {
            let service = ArtifactService::new(config, Collaborators::default()).await?;
            let versions = service
                .versions(identity.as_ref(), &repository, &artifact)
                .await?;
            for version in &versions {
                println!("{version}");
            }
            let latest = service
                .latest_version(identity.as_ref(), &repository, &artifact)
                .await?;
            eprintln!("latest: {latest}");
            Ok(())
        }
    }
}
