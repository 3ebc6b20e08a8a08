// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use treepkg::ops::{self, OpsContext, TerminalConfirm, VimDiff};
use treepkg::store;

#[cfg(not(windows))]
const DEFAULT_PREFIX: &str = "/";
#[cfg(windows)]
const DEFAULT_PREFIX: &str = "c:/";

#[cfg(not(windows))]
const DEFAULT_ROOT: &str = "/var/lib/treepkg";
#[cfg(windows)]
const DEFAULT_ROOT: &str = "c:/treepkg";

#[derive(Parser)]
#[command(name = "treepkg")]
#[command(author, version, about = "Package manager for versioned zip file trees", long_about = None)]
struct Cli {
    /// Filesystem prefix packages are installed into
    #[arg(long, default_value = DEFAULT_PREFIX, global = true)]
    prefix: String,

    /// State directory (installed-package store, cache, repos.txt)
    #[arg(long, default_value = DEFAULT_ROOT, global = true)]
    root: String,

    /// Never touch the network; only local repositories and the cache
    #[arg(long, global = true)]
    offline: bool,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    unverified_ssl: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages (`name` or `name-version`)
    Install {
        packages: Vec<String>,
        /// Overwrite existing files and reinstall already-installed packages
        #[arg(short, long)]
        force: bool,
        /// Assume yes for every confirmation
        #[arg(short, long)]
        yes: bool,
        /// Assume no for every confirmation
        #[arg(short, long)]
        no: bool,
        /// Download archives into the cache without installing
        #[arg(short = 'w', long)]
        download_only: bool,
    },
    /// Update installed packages (`name`, `name-version` or `old..new`)
    Update {
        packages: Vec<String>,
        /// Update even when the installed version is already current
        #[arg(short, long)]
        force: bool,
        /// Assume yes for every confirmation
        #[arg(short, long)]
        yes: bool,
        /// Assume no for every confirmation
        #[arg(short, long)]
        no: bool,
        /// Download archives into the cache without updating
        #[arg(short = 'w', long)]
        download_only: bool,
    },
    /// Remove installed packages
    Remove {
        packages: Vec<String>,
        /// Assume yes for every confirmation
        #[arg(short, long)]
        yes: bool,
        /// Assume no for every confirmation
        #[arg(short, long)]
        no: bool,
    },
    /// Verify installed files against their recorded checksums
    Check { packages: Vec<String> },
    /// List packages available in the configured repositories
    ListAvailable { packages: Vec<String> },
    /// List installed packages
    ListInstalled,
    /// List files under the prefix no installed package owns
    ShowUntracked { paths: Vec<String> },
    /// Merge outstanding config conflicts with vim -d
    MergeConfig { packages: Vec<String> },
    /// Exit successfully only if a package is installed
    IfInstalled { package: String },
    /// Delete cached package archives
    CleanCache,
}

impl Commands {
    fn flags(&self) -> (bool, bool, bool, bool) {
        match self {
            Commands::Install {
                force,
                yes,
                no,
                download_only,
                ..
            }
            | Commands::Update {
                force,
                yes,
                no,
                download_only,
                ..
            } => (*force, *yes, *no, *download_only),
            Commands::Remove { yes, no, .. } => (false, *yes, *no, false),
            _ => (false, false, false, false),
        }
    }
}

/// Repositories in priority order: the local cache first, then every
/// non-comment line of `<root>/repos.txt`.
fn configured_repos(root: &str, cache_dir: &str) -> Result<Vec<String>> {
    let mut repos = vec![cache_dir.to_string()];
    let repos_file = format!("{root}/repos.txt");
    if std::path::Path::new(&repos_file).exists() {
        for line in std::fs::read_to_string(&repos_file)?.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            repos.push(line.to_string());
        }
    }
    debug!("configured repos: {repos:?}");
    Ok(repos)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let cache_dir = format!("{}/cache", cli.root);
    let scratch_dir = format!("{}/tmp", cli.root);
    let db_path = format!("{}/installed.json", cli.root);
    std::fs::create_dir_all(&cache_dir)?;
    std::fs::create_dir_all(&scratch_dir)?;

    let (force, yes, no, download_only) = cli.command.flags();
    let ctx = OpsContext {
        prefix: cli.prefix.clone(),
        cache_dir: cache_dir.clone(),
        scratch_dir,
        repos: configured_repos(&cli.root, &cache_dir)?,
        force,
        offline: cli.offline,
        download_only,
        unverified_ssl: cli.unverified_ssl,
        yes,
        no,
    };

    let installed = store::load(&db_path)?;
    let confirm = TerminalConfirm;

    let changed = match cli.command {
        Commands::Install { packages, .. } => {
            ops::install_packages(&packages, &installed, &ctx, &confirm)?
        }
        Commands::Update { packages, .. } => {
            ops::update_packages(&packages, &installed, &ctx, &confirm)?
        }
        Commands::Remove { packages, .. } => {
            ops::remove_packages(&packages, &installed, &ctx, &confirm)?
        }
        Commands::Check { packages } => {
            ops::check_packages(&packages, &installed, &ctx.prefix)?;
            None
        }
        Commands::ListAvailable { packages } => {
            ops::list_available(&packages, &ctx)?;
            None
        }
        Commands::ListInstalled => {
            ops::list_installed(&installed);
            None
        }
        Commands::ShowUntracked { paths } => {
            ops::show_untracked(&installed, &ctx.prefix, &paths)?;
            None
        }
        Commands::MergeConfig { packages } => {
            ops::merge_config(&packages, &installed, &ctx.prefix, &VimDiff, &confirm)?;
            None
        }
        Commands::IfInstalled { package } => {
            if !ops::is_installed(&installed, &package) {
                std::process::exit(1);
            }
            None
        }
        Commands::CleanCache => {
            treepkg::repository::clean_cache(&ctx.cache_dir)?;
            None
        }
    };

    if let Some(updated) = changed {
        store::save(&updated, &db_path)?;
    }
    Ok(())
}
