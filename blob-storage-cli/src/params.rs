use std::path::PathBuf;
use blob_storage::{ContentHash, StorageUsage};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "blob-storage")]
#[command(about = "Read and write content-addressed blobs across the configured storages")]
pub struct Args {
    /// JSON storage configuration file.
    #[arg(short, long, conflicts_with = "storages")]
    pub(crate) config: Option<PathBuf>,
    /// Inline JSON storage configuration, either `{usage, storages}` or a
    /// bare array of storage descriptors.
    #[arg(long, env = "BLOB_STORAGES", hide_env_values = true)]
    pub(crate) storages: Option<String>,
    /// Usage class the router serves; overrides the configured one.
    #[arg(short, long)]
    pub(crate) usage: Option<StorageUsage>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Exit 0 iff a confirmed blob exists.
    Head { hash: ContentHash },
    Size { hash: ContentHash },
    /// Stream a blob to stdout or to a file.
    Get {
        hash: ContentHash,
        /// Read the upload in progress instead of the confirmed blob.
        #[arg(long)]
        unconfirmed: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Store a whole file in one step.
    Put { hash: ContentHash, file: PathBuf },
    /// Store a file through the chunked upload protocol.
    Upload {
        hash: ContentHash,
        file: PathBuf,
        #[arg(long, default_value_t = 1024 * 1024)]
        chunk_size: usize,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "application/octet-stream")]
        mime_type: String,
    },
    Rm { hash: ContentHash },
    Health,
    /// List the assembled backends in routing order.
    Backends,
}
