mod params;

use std::path::Path;
use std::process::ExitCode;
use anyhow::{bail, Context};
use blob_storage::{ContentHash, FactoryRegistry, StorageConfig, StorageRouter};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;
use crate::params::{Args, Command};

fn load_config(args: &Args) -> anyhow::Result<StorageConfig> {
    let config = match (&args.config, &args.storages) {
        (Some(path), _) => StorageConfig::from_path(path)?,
        (None, Some(raw)) => StorageConfig::from_json_str(raw)?,
        (None, None) => bail!("no storage configuration: pass --config, --storages or set BLOB_STORAGES"),
    };
    Ok(match args.usage {
        Some(usage) => config.with_usage(usage),
        None => config,
    })
}

async fn upload(
    router: &StorageRouter,
    hash: &ContentHash,
    file: &Path,
    chunk_size: usize,
    name: Option<String>,
    mime_type: &str,
) -> anyhow::Result<bool> {
    if chunk_size == 0 {
        bail!("chunk size must be positive");
    }
    let mut source = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("cannot open {}", file.display()))?;
    let size = source.metadata().await?.len();
    let name = name.unwrap_or_else(|| {
        file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    });

    if !router.init_upload(hash, size, &name, mime_type).await? {
        return Ok(false);
    }
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if !router.add_chunk(hash, &buf[..n]).await? {
            return Ok(false);
        }
        tracing::debug!(%hash, bytes = n, "chunk sent");
    }
    Ok(router.finalize_upload(hash).await?)
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let config = load_config(&args)?;
    let router = config.assemble(&FactoryRegistry::with_defaults())?;
    tracing::info!(usage = %router.usage(), backends = router.backends().len(), "storage assembled");

    match args.command {
        Command::Head { hash } => {
            let found = router.head(&hash).await;
            println!("{found}");
            Ok(found)
        }
        Command::Size { hash } => {
            println!("{}", router.get_size(&hash).await?);
            Ok(true)
        }
        Command::Get { hash, unconfirmed, output } => {
            let blob = router.read(&hash, !unconfirmed).await?;
            let copied = match output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("cannot create {}", path.display()))?;
                    blob.copy_to(&mut file).await?
                }
                None => blob.copy_to(&mut tokio::io::stdout()).await?,
            };
            tracing::info!(%hash, bytes = copied, "blob read");
            Ok(true)
        }
        Command::Put { hash, file } => {
            let stored = router.create(&hash, &file).await?;
            println!("{stored}");
            Ok(stored)
        }
        Command::Upload { hash, file, chunk_size, name, mime_type } => {
            let stored = upload(&router, &hash, &file, chunk_size, name, &mime_type).await?;
            println!("{stored}");
            Ok(stored)
        }
        Command::Rm { hash } => {
            let removed = router.remove(&hash).await?;
            println!("{removed}");
            Ok(removed)
        }
        Command::Health => {
            let healthy = router.health().await;
            println!("{}", if healthy { "ok" } else { "unhealthy" });
            Ok(healthy)
        }
        Command::Backends => {
            for (position, backend) in router.backends().iter().enumerate() {
                println!(
                    "{position}\t{backend}\tread-only={}\tskip={}",
                    backend.is_read_only(),
                    backend.should_skip(router.usage())
                );
            }
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    Ok(if run(args).await? { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
