use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use quill_fileclient::{
    AesCrypticle, ClientConfig, ClientKind, Crypticle, FileClient, PlaintextCrypticle,
    get_file_client,
};

mod cli;
mod error;

use cli::{CliArgs, Command};
use error::AppError;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Command failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    let config = load_config(&args.config).await?;
    let crypticle = load_crypticle(&args, &config)?;
    let client = get_file_client(config, crypticle).await?;

    run(client.as_ref(), args.command).await
}

/// Read the JSON config file. The default path may be absent, in which
/// case built-in defaults apply; an explicitly given path must exist.
async fn load_config(path: &Path) -> Result<ClientConfig, AppError> {
    match tokio::fs::read(path).await {
        Ok(raw) => {
            let config: ClientConfig = serde_json::from_slice(&raw)
                .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))?;
            info!(path = %path.display(), "loaded agent configuration");
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no configuration file, using defaults");
            Ok(ClientConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn load_crypticle(args: &CliArgs, config: &ClientConfig) -> Result<Arc<dyn Crypticle>, AppError> {
    match (&args.key_file, config.client_kind) {
        (Some(path), _) => {
            let key_hex = std::fs::read_to_string(path)?;
            Ok(Arc::new(AesCrypticle::from_hex(key_hex.trim())?))
        }
        (None, ClientKind::Remote) => Err(AppError::Config(
            "the remote backend needs a session key; pass --key-file".into(),
        )),
        (None, ClientKind::Local) => Ok(Arc::new(PlaintextCrypticle)),
    }
}

async fn run(client: &dyn FileClient, command: Command) -> Result<(), AppError> {
    match command {
        Command::Get {
            path,
            dest,
            makedirs,
            env,
        } => {
            let fetched = client
                .get_file(&path, dest.as_deref(), makedirs, &env)
                .await?;
            report_fetch(&path, fetched)
        }
        Command::GetUrl {
            url,
            dest,
            makedirs,
            env,
        } => {
            let fetched = client.get_url(&url, dest.as_deref(), makedirs, &env).await?;
            report_fetch(&url, fetched)
        }
        Command::GetDir { path, dest, env } => {
            for path in client.get_dir(&path, &dest, &env).await? {
                println!("{}", path.display());
            }
            Ok(())
        }
        Command::CacheFile { path, env } => {
            let fetched = client.cache_file(&path, &env).await?;
            report_fetch(&path, fetched)
        }
        Command::CacheDir { path, env } => {
            for path in client.cache_dir(&path, &env).await? {
                println!("{}", path.display());
            }
            Ok(())
        }
        Command::CacheMaster { env } => {
            let cached = client.cache_master(&env).await?;
            let fetched = cached.iter().flatten().count();
            for path in cached.iter().flatten() {
                println!("{}", path.display());
            }
            info!(fetched, total = cached.len(), "cached master tree");
            Ok(())
        }
        Command::Hash { path, env } => match client.hash_file(&path, &env).await? {
            Some(hash) => {
                println!("{}:{}", hash.hash_type, hash.hsum);
                Ok(())
            }
            None => Err(AppError::InvalidInput(format!("no such file: {path}"))),
        },
        Command::List { env } => {
            for entry in client.file_list(&env).await? {
                println!("{entry}");
            }
            Ok(())
        }
        Command::ListEmptyDirs { env } => {
            for entry in client.file_list_emptydirs(&env).await? {
                println!("{entry}");
            }
            Ok(())
        }
        Command::IsCached { path, env } => match client.is_cached(&path, &env).await? {
            Some(cached) => {
                println!("{}", cached.display());
                Ok(())
            }
            None => Err(AppError::InvalidInput(format!("not cached: {path}"))),
        },
        Command::Manifest { name, env } => {
            let fetched = client.get_manifest(&name, &env).await?;
            report_fetch(&name, fetched)
        }
        Command::MasterOpts => {
            let opts = client.master_config().await?;
            println!("{}", serde_json::to_string_pretty(&opts).map_err(io_from_json)?);
            Ok(())
        }
        Command::ExtNodes => {
            let nodes = client.ext_nodes().await?;
            println!("{}", serde_json::to_string_pretty(&nodes).map_err(io_from_json)?);
            Ok(())
        }
    }
}

fn report_fetch(
    locator: &str,
    fetched: Option<std::path::PathBuf>,
) -> Result<(), AppError> {
    match fetched {
        Some(dest) => {
            println!("{}", dest.display());
            Ok(())
        }
        None => Err(AppError::InvalidInput(format!(
            "could not fetch {locator}"
        ))),
    }
}

fn io_from_json(e: serde_json::Error) -> AppError {
    AppError::InvalidInput(e.to_string())
}
