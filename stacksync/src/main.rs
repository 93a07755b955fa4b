use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use stacksync::reconcile::{aggregate, plan};
use stacksync::{
    CachedTransport, CatalogFetcher, CatalogResolver, FileSecretStore, FileStore,
    GithubApiFactory, MemorySecretStore, PlatformInstance, ResourceStore, SecretStore,
};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stacksync")]
#[command(about = "Keep stack resources in sync with published stack catalogs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile stored stack resources against every configured repository
    Reconcile {
        /// Platform instance document (YAML)
        #[arg(short, long)]
        platform: PathBuf,
        /// Resource store file (defaults to the user data directory)
        #[arg(long)]
        store: Option<PathBuf>,
        /// Credential secrets file (YAML list)
        #[arg(long)]
        secrets: Option<PathBuf>,
        /// Print the planned mutations without applying them
        #[arg(long)]
        dry_run: bool,
        /// Re-run the pass every N seconds
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },
    /// Fetch and print the normalized catalog of each repository
    Resolve {
        #[arg(short, long)]
        platform: PathBuf,
        #[arg(long)]
        secrets: Option<PathBuf>,
        /// Only resolve the named repository
        #[arg(short, long)]
        repository: Option<String>,
        /// Only print entries with this stack id
        #[arg(long)]
        stack: Option<String>,
    },
    /// List stored stack resources
    List {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(short, long, default_value = "default")]
        namespace: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reconcile {
            platform,
            store,
            secrets,
            dry_run,
            watch,
        } => cmd_reconcile(
            &platform,
            store.as_deref(),
            secrets.as_deref(),
            dry_run,
            watch,
        ),
        Commands::Resolve {
            platform,
            secrets,
            repository,
            stack,
        } => cmd_resolve(
            &platform,
            secrets.as_deref(),
            repository.as_deref(),
            stack.as_deref(),
        ),
        Commands::List { store, namespace } => cmd_list(store.as_deref(), &namespace),
    }
}

fn load_platform(path: &Path) -> Result<PlatformInstance> {
    PlatformInstance::load(path)
        .with_context(|| format!("failed to load platform instance {}", path.display()))
}

fn open_store(path: Option<&Path>) -> Result<FileStore> {
    match path {
        Some(path) => Ok(FileStore::new(path)),
        None => FileStore::default_path()
            .map(FileStore::new)
            .context("could not determine a data directory for the resource store"),
    }
}

fn open_secrets(path: Option<&Path>) -> Box<dyn SecretStore> {
    match path {
        Some(path) => Box::new(FileSecretStore::new(path)),
        None => Box::new(MemorySecretStore::default()),
    }
}

fn cmd_reconcile(
    platform_path: &Path,
    store: Option<&Path>,
    secrets: Option<&Path>,
    dry_run: bool,
    watch: Option<u64>,
) -> Result<()> {
    let store = open_store(store)?;
    let secrets = open_secrets(secrets);

    let platform = load_platform(platform_path)?;
    let timeout = platform.spec.fetch.timeout();
    let transport = CachedTransport::new(timeout).context("failed to build http client")?;
    let releases = GithubApiFactory::new(timeout);

    let Some(interval) = watch else {
        return run_pass(&platform, &transport, secrets.as_ref(), &releases, &store, dry_run);
    };

    if interval == 0 {
        bail!("--watch interval must be at least one second");
    }

    // Transport (and its cache) lives across ticks; the platform document is
    // re-read so edits take effect on the next pass.
    loop {
        let result = load_platform(platform_path).and_then(|platform| {
            run_pass(&platform, &transport, secrets.as_ref(), &releases, &store, dry_run)
        });
        if let Err(err) = result {
            error!("reconcile pass failed, retrying in {interval}s: {err:#}");
        }
        thread::sleep(Duration::from_secs(interval));
    }
}

fn run_pass(
    platform: &PlatformInstance,
    transport: &CachedTransport,
    secrets: &dyn SecretStore,
    releases: &GithubApiFactory,
    store: &FileStore,
    dry_run: bool,
) -> Result<()> {
    let fetcher = CatalogFetcher::new(
        transport,
        secrets,
        releases,
        platform.spec.fetch.service_account.as_str(),
    );

    if !dry_run {
        let report = stacksync::reconcile(platform, &fetcher, store)?;
        println!("{report}");
        return Ok(());
    }

    let catalog = aggregate(platform, &fetcher)?;
    let current = store
        .list(platform.namespace())
        .with_context(|| format!("failed to list {}", store.path().display()))?;
    let planned = plan(platform, &catalog, &current);

    if planned.is_empty() {
        println!("nothing to do ({} unchanged)", planned.unchanged.len());
    }
    for mutation in &planned.mutations {
        println!("{}", mutation.describe());
    }
    Ok(())
}

fn cmd_resolve(
    platform_path: &Path,
    secrets: Option<&Path>,
    repository: Option<&str>,
    stack: Option<&str>,
) -> Result<()> {
    let platform = load_platform(platform_path)?;
    let secrets = open_secrets(secrets);
    let timeout = platform.spec.fetch.timeout();
    let transport = CachedTransport::new(timeout).context("failed to build http client")?;
    let releases = GithubApiFactory::new(timeout);
    let fetcher = CatalogFetcher::new(
        &transport,
        secrets.as_ref(),
        &releases,
        platform.spec.fetch.service_account.as_str(),
    );

    let selected: Vec<_> = platform
        .repositories()
        .iter()
        .filter(|repo| repository.map_or(true, |name| repo.name == name))
        .collect();
    if let Some(name) = repository {
        if selected.is_empty() {
            bail!("no repository named {name} in {}", platform_path.display());
        }
    }

    for repo in selected {
        let index = fetcher
            .resolve(&platform, repo)
            .with_context(|| format!("failed to resolve repository {}", repo.name))?;

        println!("{} ({})", repo.name, repo.source_url());
        let entries = match stack {
            Some(id) => index.search_stack(id),
            None => index.stacks.iter().collect(),
        };
        for entry in entries {
            let images: Vec<&str> = entry.images.iter().map(|image| image.image.as_str()).collect();
            println!(
                "  {:<24} {:<12} {} pipeline(s)  {}",
                entry.id,
                entry.version,
                entry.pipelines.len(),
                images.join(", ")
            );
        }
        info!(repository = %repo.name, triggers = index.triggers.len(), "resolved");
    }

    Ok(())
}

fn cmd_list(store: Option<&Path>, namespace: &str) -> Result<()> {
    let store = open_store(store)?;
    let resources = store
        .list(namespace)
        .with_context(|| format!("failed to read {}", store.path().display()))?;

    if resources.is_empty() {
        println!("No stack resources in namespace {namespace}");
        return Ok(());
    }

    for resource in resources {
        println!("{}", resource.name());
        for record in resource.versions() {
            let state = if record.is_pinned() {
                record.desired_state.as_str()
            } else {
                "-"
            };
            println!(
                "  {:<12} {:<10} {}",
                record.version, state, record.repository_url
            );
        }
    }

    Ok(())
}
