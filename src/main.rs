//! baidu_pan CLI - Transfer and manage files on Baidu Netdisk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Input;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use baidu_pan::models::format_size;
use baidu_pan::{
    remote_path, AuthState, Authenticator, ConfigLoader, OnDup, PanClient, PanError,
    TransferOptions, TransferReport,
};

/// Attempts at entering the authorization code before giving up.
const CODE_ATTEMPTS: usize = 3;

/// CLI tool for transferring files to and from Baidu Netdisk.
#[derive(Parser)]
#[command(name = "baidu_pan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./.env, then ~/.env.baidu).
    #[arg(long, global = true, env = "BAIDU_PAN_CONFIG")]
    config: Option<PathBuf>,

    /// Show progress bars and debug logging.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize this tool with a Baidu account.
    Login,

    /// Show the account and its storage quota.
    Whoami,

    /// List a remote directory.
    Ls {
        /// Remote path or pan.baidu.com URL.
        #[arg(default_value = "/")]
        path: String,

        /// Descend into subdirectories.
        #[arg(long, short = 'r')]
        recursive: bool,
    },

    /// Upload a file or folder.
    Upload {
        /// Local file or folder.
        local: PathBuf,

        /// Remote destination path (a trailing `/` keeps the local file name).
        remote: String,

        /// Replace existing remote files.
        #[arg(long)]
        overwrite: bool,

        /// Skip names matching these patterns when uploading a folder (e.g. `*.{log,tmp}`).
        #[arg(long, short = 'x')]
        exclude: Vec<String>,

        /// Print the transfer report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Download a remote file or directory.
    Download {
        /// Remote path or pan.baidu.com URL.
        remote: String,

        /// Local destination path (file or directory).
        #[arg(long, short = 't', default_value = ".")]
        to: PathBuf,

        /// Replace existing local files.
        #[arg(long)]
        overwrite: bool,

        /// Print the transfer report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Copy a remote file or directory into another directory.
    Cp {
        source: String,
        dest_dir: String,

        /// Replace an existing entry at the destination.
        #[arg(long)]
        overwrite: bool,
    },

    /// Move a remote file or directory into another directory.
    Mv {
        source: String,
        dest_dir: String,

        /// Replace an existing entry at the destination.
        #[arg(long)]
        overwrite: bool,
    },

    /// Rename a remote file or directory.
    Rename { path: String, new_name: String },

    /// Delete remote files or directories.
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Search file names below a remote directory.
    Search {
        keyword: String,

        /// Directory to search.
        #[arg(long, short = 'd', default_value = "/")]
        dir: String,

        /// Search subdirectories too.
        #[arg(long, short = 'r')]
        recursive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let config = loader.load().context("Failed to load configuration")?;
    let auth = Authenticator::from_config(config);

    if let Commands::Login = cli.command {
        authorize(&auth).await?;
        println!("Authorized.");
        return Ok(());
    }

    ensure_authorized(&auth).await?;
    let client = connect(auth).await?;

    match cli.command {
        Commands::Login => {}

        Commands::Whoami => {
            let user = client.user_info().await.context("Failed to get account info")?;
            let quota = client.quota().await.context("Failed to get quota")?;

            println!("Account: {} ({:?})", user.baidu_name, user.tier());
            println!("Netdisk: {}", user.netdisk_name);
            println!("Quota:   {}", quota);
        }

        Commands::Ls { path, recursive } => {
            let entries = if recursive {
                client.list_all(&path, true).await
            } else {
                client.list_dir(&path).await
            }
            .with_context(|| format!("Failed to list directory: {}", path))?;

            if entries.is_empty() {
                println!("No files found.");
            } else {
                println!("{:<20} {:>10} {:<4} {}", "FS_ID", "SIZE", "TYPE", "PATH");
                println!("{}", "-".repeat(100));
                for entry in entries {
                    println!("{}", entry);
                }
            }
        }

        Commands::Upload {
            local,
            remote,
            overwrite,
            exclude,
            json,
        } => {
            let options = TransferOptions::new()
                .overwrite(overwrite)
                .verbose(cli.verbose)
                .exclude(exclude);

            if local.is_dir() {
                println!("Uploading folder {} to {}...", local.display(), remote);
                let report = client
                    .upload()
                    .upload_folder(&local, &remote, &options)
                    .await
                    .with_context(|| format!("Failed to upload folder: {}", local.display()))?;
                finish_report(&report, json)?;
            } else {
                let destination = upload_destination(&local, &remote);
                print!("Uploading {}... ", local.display());

                let created = client
                    .upload()
                    .upload_file(&local, &destination, &options)
                    .await
                    .with_context(|| format!("Failed to upload file: {}", local.display()))?;

                println!("OK");
                println!("Saved to: {} ({})", created.path, format_size(created.size));
            }
        }

        Commands::Download {
            remote,
            to,
            overwrite,
            json,
        } => {
            let options = TransferOptions::new()
                .overwrite(overwrite)
                .verbose(cli.verbose);

            let entry = client
                .stat(&remote)
                .await
                .with_context(|| format!("Failed to find remote path: {}", remote))?;

            if entry.isdir {
                println!("Downloading directory {} to {}...", entry.path, to.display());
                let report = client
                    .downfile()
                    .downdir(&entry.path, &to, &options)
                    .await
                    .with_context(|| format!("Failed to download directory: {}", entry.path))?;
                finish_report(&report, json)?;
            } else {
                print!("Downloading {}... ", entry.path);

                let saved = client
                    .downfile()
                    .downfile(&entry.path, &to, &options)
                    .await
                    .with_context(|| format!("Failed to download file: {}", entry.path))?;

                println!("OK");
                println!("Saved to: {:?}", saved);
            }
        }

        Commands::Cp {
            source,
            dest_dir,
            overwrite,
        } => {
            client
                .copy(&source, &dest_dir, conflict_policy(overwrite))
                .await
                .with_context(|| format!("Failed to copy {} to {}", source, dest_dir))?;
            println!("Copied {} to {}", source, dest_dir);
        }

        Commands::Mv {
            source,
            dest_dir,
            overwrite,
        } => {
            client
                .move_to(&source, &dest_dir, conflict_policy(overwrite))
                .await
                .with_context(|| format!("Failed to move {} to {}", source, dest_dir))?;
            println!("Moved {} to {}", source, dest_dir);
        }

        Commands::Rename { path, new_name } => {
            client
                .rename(&path, &new_name)
                .await
                .with_context(|| format!("Failed to rename {}", path))?;
            println!("Renamed {} to {}", path, new_name);
        }

        Commands::Rm { paths } => {
            let targets: Vec<&str> = paths.iter().map(String::as_str).collect();
            client
                .delete(&targets)
                .await
                .context("Failed to delete")?;
            for path in &paths {
                println!("Deleted {}", path);
            }
        }

        Commands::Search {
            keyword,
            dir,
            recursive,
        } => {
            let entries = client
                .search(&keyword, &dir, recursive)
                .await
                .with_context(|| format!("Failed to search for {:?}", keyword))?;

            if entries.is_empty() {
                println!("No files found.");
            } else {
                for entry in entries {
                    println!("{}", entry);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "baidu_pan=debug" } else { "baidu_pan=warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run the authorization flow unless valid tokens are already stored.
async fn ensure_authorized(auth: &Authenticator) -> Result<()> {
    if auth.state().await == AuthState::Authorized {
        return Ok(());
    }
    println!("No stored authorization found.");
    authorize(auth).await
}

/// Connect, running the authorization flow again when the stored refresh
/// token has been rejected.
async fn connect(auth: Authenticator) -> Result<PanClient> {
    match PanClient::connect(auth.clone()).await {
        Err(PanError::TokenRefresh(reason)) => {
            println!("Stored authorization is no longer valid ({}).", reason);
            authorize(&auth).await?;
            PanClient::connect(auth)
                .await
                .context("Failed to connect to Baidu Netdisk")
        }
        result => result.context("Failed to connect to Baidu Netdisk"),
    }
}

async fn authorize(auth: &Authenticator) -> Result<()> {
    let url = auth
        .begin_authorization()
        .await
        .context("Failed to start authorization")?;

    println!("Open this URL in a browser and authorize access:");
    println!();
    println!("  {}", url);
    println!();

    for attempt in 1..=CODE_ATTEMPTS {
        let code: String = Input::new()
            .with_prompt("Authorization code")
            .interact_text()
            .context("Failed to read authorization code")?;

        match auth.submit_code(&code).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < CODE_ATTEMPTS => eprintln!("Error: {}", e),
            Err(e) => return Err(e).context("Authorization failed"),
        }
    }

    Ok(())
}

fn conflict_policy(overwrite: bool) -> OnDup {
    if overwrite {
        OnDup::Overwrite
    } else {
        OnDup::Fail
    }
}

/// Remote target for a single-file upload.
fn upload_destination(local: &Path, remote: &str) -> String {
    if !remote.ends_with('/') {
        return remote.to_string();
    }
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    remote_path::join(remote, &name)
}

/// Print a batch report; fail the command when any file failed.
fn finish_report(report: &TransferReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        for (idx, unit) in report.units.iter().enumerate() {
            match unit.failure_reason() {
                None => println!("[{}/{}] {} OK", idx + 1, report.total(), unit.destination),
                Some(reason) => {
                    println!("[{}/{}] {} FAILED", idx + 1, report.total(), unit.destination);
                    eprintln!("  Error: {}", reason);
                }
            }
        }
        println!("Done: {}", report);
    }

    if report.failed_count() > 0 {
        anyhow::bail!("{} file(s) failed", report.failed_count());
    }
    Ok(())
}
