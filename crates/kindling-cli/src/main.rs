mod commands;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{exit_code_for, parse_duration};
use kindling_config::DEFAULT_CLUSTER_NAME;
use kindling_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "kindling",
    version,
    about = "Local Kubernetes clusters running in container engine nodes"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct ClusterName {
    /// Cluster name.
    #[arg(long, env = "KIND_CLUSTER_NAME", default_value = DEFAULT_CLUSTER_NAME)]
    name: String,
}

#[derive(Debug, Args)]
struct KubeconfigPath {
    /// Kubeconfig file to update instead of $KUBECONFIG or ~/.kube/config.
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a cluster.
    #[command(subcommand)]
    Create(CreateCommand),
    /// Delete clusters.
    #[command(subcommand)]
    Delete(DeleteCommand),
    /// Get clusters, nodes or kubeconfig.
    #[command(subcommand)]
    Get(GetCommand),
    /// Export kubeconfig or logs.
    #[command(subcommand)]
    Export(ExportCommand),
    /// Load images into cluster nodes.
    #[command(subcommand)]
    Load(LoadCommand),
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
    /// Check that a container engine is usable.
    Doctor,
}

#[derive(Debug, Subcommand)]
enum CreateCommand {
    /// Create a local Kubernetes cluster.
    Cluster {
        /// Cluster name, overriding the config file.
        #[arg(long, env = "KIND_CLUSTER_NAME")]
        name: Option<String>,
        /// Path to a cluster config file (.yaml, .yml or .toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Node image to use for every node.
        #[arg(long)]
        image: Option<String>,
        /// Keep the nodes if creation fails, for debugging.
        #[arg(long, default_value_t = false)]
        retain: bool,
        /// Wait for the control plane to be ready (e.g. 60s, 5m).
        #[arg(long, default_value = "0s", value_parser = parse_duration)]
        wait: Duration,
        #[command(flatten)]
        kubeconfig: KubeconfigPath,
    },
}

#[derive(Debug, Subcommand)]
enum DeleteCommand {
    /// Delete a cluster and its kubeconfig entry.
    Cluster {
        #[command(flatten)]
        name: ClusterName,
        #[command(flatten)]
        kubeconfig: KubeconfigPath,
    },
    /// Delete several clusters.
    Clusters {
        /// Names of the clusters to delete.
        names: Vec<String>,
        /// Delete every cluster.
        #[arg(long, short = 'A', default_value_t = false, conflicts_with = "names")]
        all: bool,
        #[command(flatten)]
        kubeconfig: KubeconfigPath,
    },
}

#[derive(Debug, Subcommand)]
enum GetCommand {
    /// List clusters.
    Clusters,
    /// List the nodes of a cluster.
    Nodes {
        #[command(flatten)]
        name: ClusterName,
    },
    /// Print a cluster's kubeconfig.
    Kubeconfig {
        #[command(flatten)]
        name: ClusterName,
        /// Use the API server address reachable from inside the cluster network.
        #[arg(long, default_value_t = false)]
        internal: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ExportCommand {
    /// Merge a cluster's kubeconfig into the user's.
    Kubeconfig {
        #[command(flatten)]
        name: ClusterName,
        /// Use the API server address reachable from inside the cluster network.
        #[arg(long, default_value_t = false)]
        internal: bool,
        #[command(flatten)]
        kubeconfig: KubeconfigPath,
    },
    /// Collect engine and node logs into a directory.
    Logs {
        /// Output directory; a temporary directory is created if omitted.
        dir: Option<PathBuf>,
        #[command(flatten)]
        name: ClusterName,
    },
}

#[derive(Debug, Subcommand)]
enum LoadCommand {
    /// Load images from the host engine into the cluster nodes.
    DockerImage {
        /// Images to load.
        #[arg(required = true)]
        images: Vec<String>,
        #[command(flatten)]
        name: ClusterName,
        /// Comma-separated node names to load into (default: all nodes).
        #[arg(long, value_delimiter = ',')]
        nodes: Vec<String>,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KINDLING_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let json = cli.json;
    let result = match cli.command {
        Commands::Create(CreateCommand::Cluster {
            name,
            config,
            image,
            retain,
            wait,
            kubeconfig,
        }) => commands::create::run(
            &commands::create::Args {
                name: name.as_deref(),
                config: config.as_deref(),
                image: image.as_deref(),
                retain,
                wait,
                kubeconfig: kubeconfig.kubeconfig.as_deref(),
            },
            json,
        ),
        Commands::Delete(DeleteCommand::Cluster { name, kubeconfig }) => {
            commands::delete::run_cluster(&name.name, kubeconfig.kubeconfig.as_deref(), json)
        }
        Commands::Delete(DeleteCommand::Clusters {
            names,
            all,
            kubeconfig,
        }) => commands::delete::run_clusters(&names, all, kubeconfig.kubeconfig.as_deref(), json),
        Commands::Get(GetCommand::Clusters) => commands::get::run_clusters(json),
        Commands::Get(GetCommand::Nodes { name }) => commands::get::run_nodes(&name.name, json),
        Commands::Get(GetCommand::Kubeconfig { name, internal }) => {
            commands::get::run_kubeconfig(&name.name, internal)
        }
        Commands::Export(ExportCommand::Kubeconfig {
            name,
            internal,
            kubeconfig,
        }) => commands::export::run_kubeconfig(
            &name.name,
            internal,
            kubeconfig.kubeconfig.as_deref(),
            json,
        ),
        Commands::Export(ExportCommand::Logs { dir, name }) => {
            commands::export::run_logs(&name.name, dir.as_deref(), json)
        }
        Commands::Load(LoadCommand::DockerImage {
            images,
            name,
            nodes,
        }) => commands::load::run(&name.name, &images, &nodes, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
        Commands::Doctor => commands::doctor::run(json),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
