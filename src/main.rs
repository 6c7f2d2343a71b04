use anyhow::{anyhow, Context, Result};
use clap::Parser;
use fusebridge::modules::config::Config;
use fusebridge::{reactor, MemFs, Session};
use log::{info, LevelFilter};
use nix::unistd::{getgid, getuid};
use std::path::PathBuf;
use tokio::signal;

/// Serve an in-memory filesystem at MOUNTPOINT until interrupted.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Where to mount (overrides the configuration file)
    mountpoint: Option<PathBuf>,
}

fn init_logging(verbose: bool, config: &Config) {
    let mut builder = env_logger::Builder::new();
    // -v beats the config file, RUST_LOG beats both
    match (verbose, config.log_level.as_deref()) {
        (true, _) => builder.filter_level(LevelFilter::Debug),
        (false, Some(filters)) => builder.parse_filters(filters),
        (false, None) => builder.filter_level(LevelFilter::Info),
    };
    builder.parse_default_env().init();
}

fn build_filesystem(config: &Config) -> Result<MemFs> {
    let mut fs = MemFs::default()
        .with_ttl(config.ttl())
        .with_owner(getuid().as_raw(), getgid().as_raw());
    for seed in &config.files {
        fs.seed_file(&seed.path, seed.content.as_bytes())
            .map_err(std::io::Error::from_raw_os_error)
            .with_context(|| format!("Failed to seed {}", seed.path.display()))?;
    }
    Ok(fs)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    init_logging(cli.verbose, &config);

    info!("Starting fusebridge...");

    let mountpoint = cli
        .mountpoint
        .or_else(|| config.mountpoint.clone())
        .ok_or_else(|| anyhow!("No mountpoint given on the command line or in the config"))?;

    let fs = build_filesystem(&config)?;
    let mut session = Session::create(&mountpoint, fs)
        .with_context(|| format!("Failed to mount at {}", mountpoint.display()))?;

    info!(
        "Serving {} (session {}), press Ctrl-C to unmount",
        mountpoint.display(),
        session.id()
    );
    reactor::drive(&mut session, signal::ctrl_c()).await?;
    session.delete()?;

    info!("Unmounted {}", mountpoint.display());
    Ok(())
}
