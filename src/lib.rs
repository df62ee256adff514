//! baidu_pan - A client for Baidu Netdisk (PCS).
//!
//! This library provides functionality to:
//! - Load application credentials and tokens from `.env`-style files
//! - Authorize through the OAuth2 authorization-code flow and keep tokens fresh
//! - Upload files and folders (sliced upload for large files)
//! - Download files and directories to the local filesystem
//! - Copy, move, rename, delete and search remote files
//!
//! # Example
//!
//! ```no_run
//! use baidu_pan::{Authenticator, ConfigLoader, PanClient, TransferOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().load()?;
//!     let auth = Authenticator::from_config(config);
//!     let client = PanClient::connect(auth).await?;
//!
//!     let options = TransferOptions::new().overwrite(true);
//!     client.upload().upload_file("notes.txt", "/apps/demo/notes.txt", &options).await?;
//!
//!     let report = client.downfile().downdir("/apps/demo", "backup", &options).await?;
//!     println!("{}", report);
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod hashing;
pub mod manage;
pub mod models;
pub mod progress;
pub mod remote_path;
pub mod transfer;
pub mod upload;

// Re-exports for convenience
pub use auth::{AuthState, Authenticator};
pub use client::PanClient;
pub use config::{ConfigLoader, EnvFile, Endpoints, LoadedConfig};
pub use download::DownloadClient;
pub use error::{PanError, Result};
pub use manage::{FileOperation, OnDup};
pub use models::{AppCredentials, Category, Credential, RemoteEntry, Tokens};
pub use transfer::{FileTransferUnit, TransferOptions, TransferReport, TransferStatus};
pub use upload::UploadClient;
