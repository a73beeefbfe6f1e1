use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use swiftdeps::config::WorkflowConfig;
use swiftdeps::coordinator::{CommandOutcome, DependencyCoordinator};
use swiftdeps::workspace::WorkspaceContext;
use swiftdeps::{FolderContext, Result};
use tracing_subscriber::EnvFilter;

/// Manage the dependencies of a Swift package.
#[derive(Parser)]
#[command(name = "swiftdeps", version, about)]
struct Cli {
    /// Package folder to operate on
    #[arg(long, global = true, default_value = ".")]
    folder: PathBuf,

    /// JSON configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update dependencies to the newest allowed versions
    Update,
    /// Resolve dependencies to the versions pinned in Package.resolved
    Resolve,
    /// Take a dependency's sources from a local directory
    UseLocal {
        /// Dependency identity
        name: String,
        /// Local package directory
        path: PathBuf,
        /// Resolve right after switching
        #[arg(long)]
        resolve: bool,
    },
    /// Check a dependency out for local modification
    Edit {
        /// Dependency identity
        name: String,
    },
    /// Return an edited dependency to its remote source
    Unedit {
        /// Dependency identity
        name: String,
    },
    /// Discard checkouts and build artifacts
    Reset,
    /// Build the package and its tests
    Build,
    /// Show the dependency graph
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => WorkflowConfig::load(path).await?,
        None => WorkflowConfig::default(),
    };

    let workspace = Arc::new(WorkspaceContext::new(config));
    let folder = workspace.focus_folder(cli.folder).await?;
    let coordinator = DependencyCoordinator::new(Arc::clone(&workspace));

    // Ctrl-C terminates the running tool; the operation still reports how it ended.
    let interrupt = {
        let workspace = Arc::clone(&workspace);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                for folder in workspace.folders() {
                    folder.cancel_all();
                }
            }
        })
    };

    let outcome = match cli.command {
        Commands::Update => coordinator.update_dependencies(&folder).await?,
        Commands::Resolve => coordinator.resolve_dependencies(&folder).await?,
        Commands::UseLocal {
            name,
            path,
            resolve: true,
        } => {
            coordinator
                .use_local_dependency_and_resolve(&folder, &name, &path)
                .await?
        }
        Commands::UseLocal { name, path, .. } => {
            coordinator.use_local_dependency(&folder, &name, &path).await?
        }
        Commands::Edit { name } => coordinator.edit_dependency(&folder, &name).await?,
        Commands::Unedit { name } => coordinator.unedit_dependency(&folder, &name).await?,
        Commands::Reset => coordinator.reset_package(&folder).await?,
        Commands::Build => coordinator.build(&folder).await?,
        Commands::Show => {
            show(&folder).await;
            interrupt.abort();
            return Ok(true);
        }
    };
    interrupt.abort();

    report(&outcome);
    Ok(outcome.into())
}

fn report(outcome: &CommandOutcome) {
    match outcome {
        CommandOutcome::Succeeded(output) => print!("{}", output.output),
        CommandOutcome::Failed(output) => {
            print!("{}", output.output);
            eprintln!("{} exited with code {}", output.command, output.exit_code);
            for missing in output.missing_products() {
                eprintln!(
                    "product '{}' required by '{}' is not provided by any dependency",
                    missing.product, missing.package
                );
            }
        }
        CommandOutcome::Cancelled => eprintln!("cancelled"),
    }
}

async fn show(folder: &FolderContext) {
    let graph = folder.graph().await;
    if graph.is_empty() {
        println!("{}: no resolved dependencies", folder.root().display());
        return;
    }
    for node in graph.nodes() {
        let pending = if node.pending_resolve {
            " (resolve pending)"
        } else {
            ""
        };
        println!(
            "{:<32} {:<12} {}{}",
            node.name,
            node.state.to_string(),
            node.version.as_deref().unwrap_or("-"),
            pending
        );
    }
}
