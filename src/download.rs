//! File and directory downloads.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Response;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::client::PanClient;
use crate::error::{PanError, Result};
use crate::models::RemoteEntry;
use crate::progress::TransferProgress;
use crate::remote_path;
use crate::transfer::{FileTransferUnit, TransferOptions, TransferReport};

/// Download operations, borrowed from a [`PanClient`].
pub struct DownloadClient<'a> {
    pan: &'a PanClient,
}

impl<'a> DownloadClient<'a> {
    pub(crate) fn new(pan: &'a PanClient) -> Self {
        Self { pan }
    }

    /// Download the remote file `remote` to `output`.
    ///
    /// When `output` is an existing directory the remote file name is
    /// appended. Returns the path written.
    ///
    /// # Arguments
    /// * `remote` - Remote file path or `pan.baidu.com` link
    /// * `output` - Local file or directory to write to
    /// * `options` - Overwrite policy and progress display
    pub async fn downfile<P: AsRef<Path>>(
        &self,
        remote: &str,
        output: P,
        options: &TransferOptions,
    ) -> Result<PathBuf> {
        let remote = remote_path::normalize(remote)?;
        let output = output.as_ref();
        let target = if output.is_dir() {
            output.join(remote_path::file_name(&remote))
        } else {
            output.to_path_buf()
        };

        if !options.overwrite && target.exists() {
            return Err(PanError::FileExists(target));
        }

        let entry = self.pan.stat(&remote).await?;
        if entry.isdir {
            return Err(PanError::NotFound(format!("{} is a directory", remote)));
        }

        self.fetch(&entry, &target, options).await?;
        Ok(target)
    }

    /// Download every file below the remote directory `remote` into `output`,
    /// preserving relative paths.
    ///
    /// A file that fails is recorded in the report and the remaining files
    /// are still downloaded.
    ///
    /// # Arguments
    /// * `remote` - Remote directory to mirror
    /// * `output` - Local directory, created when missing
    /// * `options` - Overwrite policy and progress display
    pub async fn downdir<P: AsRef<Path>>(
        &self,
        remote: &str,
        output: P,
        options: &TransferOptions,
    ) -> Result<TransferReport> {
        let remote = remote_path::normalize(remote)?;
        let output = output.as_ref();

        let files: Vec<RemoteEntry> = self
            .pan
            .list_all(&remote, true)
            .await?
            .into_iter()
            .filter(|entry| !entry.isdir)
            .collect();
        info!(remote = %remote, local = %output.display(), files = files.len(), "downloading directory");

        tokio::fs::create_dir_all(output).await?;

        let mut report = TransferReport::default();
        for entry in files {
            // Listed paths come from the server and must stay below `output`.
            let path = match remote_path::normalize(&entry.path) {
                Ok(path) => path,
                Err(e) => {
                    warn!(path = %entry.path, "unsafe remote path, not downloaded");
                    let mut unit = FileTransferUnit::new(
                        entry.path.clone(),
                        output.display().to_string(),
                        entry.size,
                    );
                    unit.fail(e);
                    report.push(unit);
                    continue;
                }
            };
            let Some(relative) = remote_path::relative_to(&path, &remote) else {
                warn!(path = %entry.path, "entry outside requested directory, skipped");
                continue;
            };
            let target = relative
                .split('/')
                .filter(|c| !c.is_empty())
                .fold(output.to_path_buf(), |path, component| path.join(component));

            let mut unit = FileTransferUnit::new(
                entry.path.clone(),
                target.display().to_string(),
                entry.size,
            );
            unit.start();

            let result = if !options.overwrite && target.exists() {
                Err(PanError::FileExists(target.clone()))
            } else {
                self.fetch(&entry, &target, options).await
            };
            match result {
                Ok(()) => unit.succeed(),
                Err(e) => {
                    warn!(file = %entry.path, error = %e, "download failed");
                    unit.fail(e);
                }
            }
            report.push(unit);
        }

        info!(%report, "directory download finished");
        Ok(report)
    }

    /// Stream one remote file into `target` through a `.part` file.
    async fn fetch(&self, entry: &RemoteEntry, target: &Path, options: &TransferOptions) -> Result<()> {
        let dlink = self
            .pan
            .file_metas(&[entry.fs_id], true)
            .await?
            .into_iter()
            .find(|meta| meta.fs_id == entry.fs_id)
            .and_then(|meta| meta.dlink)
            .ok_or_else(|| PanError::NotFound(format!("download link for {}", entry.path)))?;

        let token = self.pan.auth().get_access_token().await?;
        let separator = if dlink.contains('?') { '&' } else { '?' };
        let url = format!("{}{}access_token={}", dlink, separator, urlencoding::encode(&token));

        info!(remote = %entry.path, local = %target.display(), size = entry.size, "downloading file");
        let response = self.pan.http().get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PanError::RemoteApi {
                code: status.as_u16() as i64,
                message: body,
            });
        }

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let progress = TransferProgress::new(entry.size, &entry.server_filename, options.verbose);
        if let Some(total) = response.content_length() {
            progress.set_total(total);
        }

        let partial = part_path(target);
        match write_body(response, &partial, &progress).await {
            Ok(written) => {
                tokio::fs::rename(&partial, target).await?;
                progress.finish();
                debug!(path = %target.display(), bytes = written, "download complete");
                Ok(())
            }
            Err(e) => {
                progress.abandon();
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), error = %cleanup, "no partial file to remove");
                }
                Err(e)
            }
        }
    }
}

async fn write_body(response: Response, path: &Path, progress: &TransferProgress) -> Result<u64> {
    let mut file = File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        progress.advance(chunk.len() as u64);
    }

    file.flush().await?;
    Ok(written)
}

/// `<target>.part`, the file a download is streamed into before the rename.
fn part_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}
