//! `offline-precache` command line entry point.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use offline_precache::runtime::{DirCacheStorage, HttpNetwork};
use offline_precache::{
  BuildOutcome, CacheVersionController, ControllerOptions, Deployment, InstallOutcome, Manifest,
  PrecacheBuilder, PrecacheConfig, ProjectPaths,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Compile precache manifests and manage offline cache versions.
#[derive(Parser, Debug)]
#[command(name = "offline-precache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
  #[command(subcommand)]
  command: Commands,

  /// Increase verbosity (-v info, -vv debug)
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  /// Project directory holding the configuration and assets
  #[arg(short = 'C', long, global = true, default_value = ".")]
  project_dir: PathBuf,

  /// Configuration file path, discovered in the project directory when omitted
  #[arg(short, long, global = true, env = "OFFLINE_PRECACHE_CONFIG")]
  config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Compile the manifest and offline page into the output directory
  Build(BuildArgs),

  /// Check that the manifest on disk matches the current inputs
  Verify(DeploymentArgs),

  /// Print a summary of a compiled manifest
  Inspect(InspectArgs),

  /// Populate a cache directory from a compiled manifest
  Install(InstallArgs),
}

#[derive(Args, Debug)]
struct DeploymentArgs {
  /// Deployment whose client configuration is embedded in the offline page
  #[arg(short, long, env = "DEPLOYMENT", default_value_t = Deployment::Development)]
  deployment: Deployment,
}

#[derive(Args, Debug)]
struct BuildArgs {
  #[command(flatten)]
  deployment: DeploymentArgs,

  /// Print the manifest instead of writing outputs
  #[arg(long)]
  dry_run: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
  /// Manifest to read, defaults to the configured output location
  manifest: Option<PathBuf>,

  /// List every entry
  #[arg(short, long)]
  entries: bool,
}

#[derive(Args, Debug)]
struct InstallArgs {
  /// Origin serving the application
  #[arg(long)]
  origin: String,

  /// Directory holding the cache stores
  #[arg(long, default_value = ".offline-cache")]
  cache_dir: PathBuf,

  /// Prefix of the cache store names
  #[arg(long, default_value = "precache")]
  cache_prefix: String,

  /// Manifest to install, defaults to the configured output location
  manifest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = match cli.verbose {
    0 => EnvFilter::new("offline_precache=warn"),
    1 => EnvFilter::new("offline_precache=info"),
    _ => EnvFilter::new("offline_precache=debug"),
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .without_time()
    .init();

  match run(cli).await {
    Ok(code) => code,
    Err(err) => {
      eprintln!("error: {err:#}");
      ExitCode::FAILURE
    }
  }
}

async fn run(cli: Cli) -> Result<ExitCode> {
  let config = load_config(&cli)?;
  match cli.command {
    Commands::Build(args) => build(&cli.project_dir, &config, args),
    Commands::Verify(args) => verify(&cli.project_dir, &config, args.deployment),
    Commands::Inspect(args) => inspect(&cli.project_dir, &config, args),
    Commands::Install(args) => install(&cli.project_dir, &config, args).await,
  }
}

fn load_config(cli: &Cli) -> Result<PrecacheConfig> {
  let config = match &cli.config {
    Some(path) => PrecacheConfig::load(path)
      .with_context(|| format!("loading configuration from {}", path.display()))?,
    None => PrecacheConfig::discover(&cli.project_dir)
      .with_context(|| format!("discovering configuration in {}", cli.project_dir.display()))?,
  };
  debug!(enabled = config.enabled, "configuration loaded");
  Ok(config)
}

fn build(project_dir: &Path, config: &PrecacheConfig, args: BuildArgs) -> Result<ExitCode> {
  let builder = PrecacheBuilder::new(config, project_dir, args.deployment.deployment);
  let outcome = builder.build(Utc::now()).context("compiling precache manifest")?;

  if args.dry_run {
    match outcome.manifest() {
      Some(manifest) => println!("{}", manifest.to_json_pretty()?),
      None => println!("offline support is disabled, nothing to emit"),
    }
    return Ok(ExitCode::SUCCESS);
  }

  let written = builder.write(&outcome).context("writing precache outputs")?;
  for path in &written {
    println!("wrote {}", path.display());
  }
  if let BuildOutcome::Compiled(artifacts) = &outcome {
    println!(
      "version {} with {} entries",
      artifacts.manifest.version,
      artifacts.manifest.entries.len()
    );
  }
  Ok(ExitCode::SUCCESS)
}

fn verify(
  project_dir: &Path,
  config: &PrecacheConfig,
  deployment: Deployment,
) -> Result<ExitCode> {
  let builder = PrecacheBuilder::new(config, project_dir, deployment);
  let outcome = builder.build(Utc::now()).context("compiling precache manifest")?;
  let manifest_path = builder.paths().manifest_path(config);

  let Some(expected) = outcome.manifest() else {
    if manifest_path.exists() {
      println!("offline support is disabled but {} exists", manifest_path.display());
      return Ok(ExitCode::FAILURE);
    }
    println!("offline support is disabled, nothing to verify");
    return Ok(ExitCode::SUCCESS);
  };

  if !manifest_path.exists() {
    println!("missing {}", manifest_path.display());
    return Ok(ExitCode::FAILURE);
  }
  let on_disk = Manifest::load(&manifest_path)
    .with_context(|| format!("reading {}", manifest_path.display()))?;

  if on_disk.version == expected.version {
    println!("up to date: version {}", on_disk.version);
    Ok(ExitCode::SUCCESS)
  } else {
    println!(
      "stale: {} holds version {}, inputs produce {}",
      manifest_path.display(),
      on_disk.version,
      expected.version
    );
    Ok(ExitCode::FAILURE)
  }
}

fn inspect(project_dir: &Path, config: &PrecacheConfig, args: InspectArgs) -> Result<ExitCode> {
  let path = manifest_location(project_dir, config, args.manifest);
  let manifest =
    Manifest::load(&path).with_context(|| format!("reading {}", path.display()))?;

  println!("manifest:  {}", path.display());
  println!("version:   {}", manifest.version);
  println!("generated: {}", manifest.generated_at.to_rfc3339());
  println!("entries:   {}", manifest.entries.len());
  println!("bytes:     {}", manifest.total_size());
  if let Some(fallback) = &manifest.navigate_fallback_url {
    println!("fallback:  {fallback}");
  }
  if args.entries {
    for entry in &manifest.entries {
      let short = entry.fingerprint.get(..12).unwrap_or(&entry.fingerprint);
      println!("  {short}  {}", entry.url);
    }
  }
  Ok(ExitCode::SUCCESS)
}

async fn install(
  project_dir: &Path,
  config: &PrecacheConfig,
  args: InstallArgs,
) -> Result<ExitCode> {
  let path = manifest_location(project_dir, config, args.manifest);
  let manifest =
    Manifest::load(&path).with_context(|| format!("reading {}", path.display()))?;

  let storage = Arc::new(DirCacheStorage::new(args.cache_dir.clone()));
  let network = Arc::new(HttpNetwork::new(args.origin.clone()));
  let controller = CacheVersionController::new(storage, network, ControllerOptions {
    cache_prefix: args.cache_prefix,
    origin: Some(args.origin),
    revalidate: false,
  });

  match controller.install(manifest).await.context("installing cache version")? {
    InstallOutcome::Activated { version } | InstallOutcome::Unchanged { version } => {
      info!(%version, "cache version ready");
      println!("installed version {version} into {}", args.cache_dir.display());
    }
    InstallOutcome::Waiting { previous_version, version } => {
      println!("version {version} installed, waiting behind {previous_version}");
    }
  }
  Ok(ExitCode::SUCCESS)
}

fn manifest_location(
  project_dir: &Path,
  config: &PrecacheConfig,
  explicit: Option<PathBuf>,
) -> PathBuf {
  explicit
    .unwrap_or_else(|| ProjectPaths::resolve(config, project_dir).manifest_path(config))
}
