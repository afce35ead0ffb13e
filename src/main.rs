mod api;
mod config;
mod crypto;
mod fuse;
mod ingest;
mod registry;
mod state;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use zeroize::Zeroizing;

use api::auth::Credentials;
use config::Config;

/// Mount remote object-store projects as a read-only filesystem.
#[derive(Parser, Debug)]
#[command(name = "stratafs", version)]
struct Args {
    /// Account name used for every repository
    #[arg(long, env = "STRATAFS_USERNAME")]
    username: String,

    /// Number of ingestion workers (overrides STRATAFS_WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,

    /// Directory to mount on [default: ~/Projects]
    mountpoint: Option<PathBuf>,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let default_filter = if args.debug { "stratafs=debug" } else { "stratafs=info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    log::info!("stratafs starting...");

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }

    let Some(mount_path) = args.mountpoint.or_else(fuse::default_mount_point) else {
        log::error!("Could not determine home directory; pass a mount point");
        return ExitCode::from(2);
    };

    let password = match read_password() {
        Ok(password) => password,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(2);
        }
    };
    let credentials = Credentials::new(&args.username, &password);
    drop(password);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Failed to start tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&rt, config, &credentials, &mount_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// STRATAFS_PASSWORD, or a hidden prompt on the terminal.
fn read_password() -> Result<Zeroizing<String>, String> {
    password_from(std::env::var("STRATAFS_PASSWORD").ok(), || {
        dialoguer::Password::new()
            .with_prompt("Password")
            .interact()
            .map_err(|e| format!("Failed to read password: {}", e))
    })
}

fn password_from<F>(env: Option<String>, prompt: F) -> Result<Zeroizing<String>, String>
where
    F: FnOnce() -> Result<String, String>,
{
    match env {
        Some(password) => Ok(Zeroizing::new(password)),
        None => prompt().map(Zeroizing::new),
    }
}

/// Log in, build the tree, mount and serve until Ctrl-C.
#[cfg(feature = "fuse")]
fn run(
    rt: &tokio::runtime::Runtime,
    config: Config,
    credentials: &Credentials,
    mount_path: &Path,
) -> Result<(), String> {
    use state::{MountStatus, Session};

    let session = rt
        .block_on(Session::connect(config, credentials))
        .map_err(|e| e.to_string())?;

    let stats = rt.block_on(session.build_tree());
    if stats.failed > 0 {
        log::warn!("{} containers could not be listed and are not shown", stats.failed);
    }

    let fs = fuse::StrataFS::new(
        session.tree.clone(),
        session.registry.clone(),
        rt.handle().clone(),
    );
    let mount_thread = match fuse::mount_filesystem(fs, mount_path) {
        Ok(handle) => handle,
        Err(e) => {
            session.set_status(MountStatus::Error(e.clone()));
            session.shutdown();
            return Err(e);
        }
    };
    session.set_status(MountStatus::Mounted);
    log::info!("Mounted at {}; press Ctrl-C to unmount", mount_path.display());

    if let Err(e) = rt.block_on(tokio::signal::ctrl_c()) {
        log::error!("Failed to listen for Ctrl-C: {}", e);
    }

    let result = fuse::unmount_filesystem(mount_path);
    if result.is_ok() && mount_thread.join().is_err() {
        log::error!("FUSE thread panicked");
    }
    session.shutdown();
    result
}

#[cfg(not(feature = "fuse"))]
fn run(
    _rt: &tokio::runtime::Runtime,
    _config: Config,
    _credentials: &Credentials,
    _mount_path: &Path,
) -> Result<(), String> {
    Err("stratafs was built without the `fuse` feature; nothing to mount".to_string())
}
