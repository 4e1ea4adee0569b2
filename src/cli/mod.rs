//! CLI argument parsing and command dispatch

mod services;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hammer_core::{
    CoordinationStore, HammerConfig, ServerRegistry, Test, TestRegistry, TestResponse,
};
use hammer_storage::StoreBackend;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "hammer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Coordination store backend [default: etcd]; `standalone` always
    /// runs in memory
    #[arg(long, global = true)]
    pub store: Option<StoreBackend>,

    /// etcd endpoints, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    pub endpoints: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a worker: heartbeat and execute assigned tests
    Worker,
    /// Run a coordinator: sweep stale workers and fan out registry updates
    Coordinator,
    /// Run a coordinator and one worker in-process against an in-memory store
    Standalone {
        /// Test definition files (JSON)
        #[arg(short, long = "test", required = true)]
        tests: Vec<PathBuf>,
    },
    /// Submit a test definition
    Submit {
        /// Test definition file (JSON)
        #[arg(short, long)]
        test: PathBuf,
    },
    /// Show one test
    Get {
        /// Test id
        #[arg(long)]
        id: String,
    },
    /// List active tests
    Tests,
    /// List published results of a test
    Results {
        /// Test id
        #[arg(long)]
        id: String,
    },
    /// List registered workers
    Servers,
    /// Stop a test before its lease expires
    Stop {
        /// Test id
        #[arg(long)]
        id: String,
    },
}

impl Cli {
    /// Platform configuration from `--config`, or the defaults
    pub fn load_config(&self) -> Result<HammerConfig> {
        match &self.config {
            Some(path) => HammerConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display())),
            None => Ok(HammerConfig::default()),
        }
    }

    /// Store backend selected by `--store` and `--endpoints`
    pub fn backend(&self) -> StoreBackend {
        match &self.store {
            None | Some(StoreBackend::Etcd { .. }) => StoreBackend::etcd(self.endpoints.clone()),
            Some(other) => other.clone(),
        }
    }
}

/// Read a test definition file
pub fn load_test(path: &Path) -> Result<Test> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read test file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse test file {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Shared store for the distributed commands
///
/// The memory backend lives and dies with one process, so only `standalone`
/// may use it.
async fn connect(cli: &Cli) -> Result<Arc<dyn CoordinationStore>> {
    let backend = cli.backend();
    if backend == StoreBackend::Memory {
        bail!("the memory store is private to one process; use `hammer standalone` or `--store etcd`");
    }
    hammer_storage::connect(&backend)
        .await
        .with_context(|| format!("failed to connect to {} store", backend.name()))
}

/// Execute the parsed command
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;

    match &cli.command {
        Commands::Worker => services::worker(connect(&cli).await?, config).await,
        Commands::Coordinator => services::coordinator(connect(&cli).await?, config).await,
        Commands::Standalone { tests } => services::standalone(config, tests).await,
        Commands::Submit { test } => {
            let test = load_test(test)?;
            let registry = TestRegistry::new(connect(&cli).await?, &config);
            let id = registry.create_test(test).await?;
            print_json(&TestResponse { id })
        }
        Commands::Get { id } => {
            let registry = TestRegistry::new(connect(&cli).await?, &config);
            match registry.get_test(id).await? {
                Some(test) => print_json(&test),
                None => bail!("test {id} does not exist"),
            }
        }
        Commands::Tests => {
            let registry = TestRegistry::new(connect(&cli).await?, &config);
            print_json(&registry.list_tests().await?)
        }
        Commands::Results { id } => {
            let registry = TestRegistry::new(connect(&cli).await?, &config);
            print_json(&registry.list_results(id).await?)
        }
        Commands::Servers => {
            let servers = ServerRegistry::new(connect(&cli).await?, &config);
            print_json(&servers.list_servers().await?)
        }
        Commands::Stop { id } => {
            let registry = TestRegistry::new(connect(&cli).await?, &config);
            let stopped = registry.stop_test(id).await?;
            print_json(&serde_json::json!({ "ID": id, "Stopped": stopped }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "hammer",
            "servers",
            "--store",
            "etcd",
            "--endpoints",
            "10.0.0.1:2379,10.0.0.2:2379",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Servers));
        assert_eq!(
            cli.backend(),
            StoreBackend::Etcd {
                endpoints: vec!["10.0.0.1:2379".into(), "10.0.0.2:2379".into()]
            }
        );
    }

    #[test]
    fn test_default_backend_is_local_etcd() {
        let cli = Cli::try_parse_from(["hammer", "tests"]).unwrap();
        assert_eq!(
            cli.backend(),
            StoreBackend::Etcd {
                endpoints: vec!["127.0.0.1:2379".into()]
            }
        );
        assert_eq!(cli.load_config().unwrap(), HammerConfig::default());

        // Endpoints alone imply etcd
        let cli = Cli::try_parse_from(["hammer", "tests", "--endpoints", "10.0.0.9:2379"]).unwrap();
        assert_eq!(
            cli.backend(),
            StoreBackend::Etcd {
                endpoints: vec!["10.0.0.9:2379".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_memory_store_refused_for_distributed_commands() {
        let cli = Cli::try_parse_from(["hammer", "submit", "-t", "a.json", "--store", "memory"])
            .unwrap();
        assert_eq!(cli.backend(), StoreBackend::Memory);

        let err = connect(&cli).await.err().unwrap();
        assert!(err.to_string().contains("hammer standalone"));
    }

    #[test]
    fn test_standalone_requires_test_files() {
        assert!(Cli::try_parse_from(["hammer", "standalone"]).is_err());

        let cli =
            Cli::try_parse_from(["hammer", "standalone", "-t", "a.json", "-t", "b.json"]).unwrap();
        match cli.command {
            Commands::Standalone { tests } => assert_eq!(tests.len(), 2),
            _ => panic!("expected standalone"),
        }
    }

    #[test]
    fn test_unknown_store_is_rejected() {
        assert!(Cli::try_parse_from(["hammer", "tests", "--store", "redis"]).is_err());
    }

    #[test]
    fn test_load_test_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"Length": 5, "VirtualUsers": 2,
                "Targets": [{{"URI": "http://localhost:8080/", "Method": "GET"}}]}}"#
        )
        .unwrap();

        let test = load_test(file.path()).unwrap();
        assert_eq!(test.length, 5);
        assert_eq!(test.virtual_users, 2);
        assert_eq!(test.targets.len(), 1);
        assert!(test.servers.is_empty());
    }

    #[test]
    fn test_load_test_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = load_test(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse test file"));
    }
}
