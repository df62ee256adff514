//! File and folder uploads.
//!
//! Files no larger than the slice size go up in one multipart request.
//! Larger files use the sliced protocol: `precreate`, `locateupload`,
//! one `superfile2` request per missing slice, then `create`.

use std::ffi::OsStr;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use glob::Pattern;
use reqwest::multipart::{Form, Part};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::client::{read_json, PanClient};
use crate::error::{PanError, Result};
use crate::hashing::FileDigest;
use crate::models::{CreatedFile, LocateUploadResponse, PrecreateResponse, SlicePartResponse};
use crate::progress::TransferProgress;
use crate::remote_path;
use crate::transfer::{FileTransferUnit, TransferOptions, TransferReport};

/// App id the PCS upload endpoints expect.
const PCS_APP_ID: &str = "250528";

/// Upload operations, borrowed from a [`PanClient`].
pub struct UploadClient<'a> {
    pan: &'a PanClient,
}

impl<'a> UploadClient<'a> {
    pub(crate) fn new(pan: &'a PanClient) -> Self {
        Self { pan }
    }

    /// Upload a single local file to the remote path `remote`.
    ///
    /// Without `overwrite`, an existing remote file is kept and the server
    /// stores the upload under a renamed copy.
    ///
    /// # Arguments
    /// * `local` - Path of the local file
    /// * `remote` - Absolute remote path or `pan.baidu.com` link of the target
    /// * `options` - Conflict policy and progress display
    pub async fn upload_file<P: AsRef<Path>>(
        &self,
        local: P,
        remote: &str,
        options: &TransferOptions,
    ) -> Result<CreatedFile> {
        let local = local.as_ref();
        let remote = remote_path::normalize(remote)?;

        let metadata = tokio::fs::metadata(local)
            .await
            .ok()
            .filter(|m| m.is_file())
            .ok_or_else(|| PanError::NotFound(local.display().to_string()))?;

        let size = metadata.len();
        info!(local = %local.display(), remote = %remote, size, "uploading file");

        if size <= self.pan.slice_size() {
            self.upload_single(local, &remote, size, options).await
        } else {
            self.upload_sliced(local, &remote, options).await
        }
    }

    /// Upload every file below `local` into the remote directory `remote`,
    /// preserving relative paths.
    ///
    /// A file that fails is recorded in the report and the walk continues.
    ///
    /// # Arguments
    /// * `local` - Local folder to upload
    /// * `remote` - Remote directory receiving the files
    /// * `options` - Conflict policy, progress display and exclude patterns
    pub async fn upload_folder<P: AsRef<Path>>(
        &self,
        local: P,
        remote: &str,
        options: &TransferOptions,
    ) -> Result<TransferReport> {
        let root = local.as_ref();
        if !root.exists() {
            return Err(PanError::NotFound(root.display().to_string()));
        }
        if !root.is_dir() {
            return Err(PanError::InvalidPath(root.display().to_string()));
        }

        let remote = remote_path::normalize(remote)?;
        let exclude = ExcludeSet::new(&options.exclude)?;
        let planned = plan_folder(root, &remote, &exclude);
        info!(
            local = %root.display(),
            remote = %remote,
            files = planned.len(),
            "uploading folder"
        );

        let mut report = TransferReport::default();
        for (source, mut unit) in planned {
            if unit.failure_reason().is_some() {
                report.push(unit);
                continue;
            }

            unit.start();
            match self.upload_file(&source, &unit.destination, options).await {
                Ok(created) => {
                    debug!(path = %created.path, fs_id = created.fs_id, "uploaded");
                    unit.succeed();
                }
                Err(e) => {
                    warn!(file = %source.display(), error = %e, "upload failed");
                    unit.fail(e);
                }
            }
            report.push(unit);
        }

        info!(%report, "folder upload finished");
        Ok(report)
    }

    async fn upload_single(
        &self,
        local: &Path,
        remote: &str,
        size: u64,
        options: &TransferOptions,
    ) -> Result<CreatedFile> {
        let progress = TransferProgress::new(size, remote_path::file_name(remote), options.verbose);
        let token = self.pan.auth().get_access_token().await?;
        let content = tokio::fs::read(local).await?;

        let mime_type = mime_guess::from_path(local)
            .first_or_octet_stream()
            .to_string();
        let part = Part::bytes(content)
            .file_name(remote_path::file_name(remote).to_string())
            .mime_str(&mime_type)?;
        let form = Form::new().part("file", part);

        let url = format!("{}/rest/2.0/pcs/file", self.pan.endpoints().pcs);
        let response = self
            .pan
            .http()
            .post(&url)
            .query(&[
                ("method", "upload"),
                ("path", remote),
                ("ondup", ondup(options)),
                ("access_token", token.as_str()),
            ])
            .multipart(form)
            .send()
            .await;

        let created = match response {
            Ok(response) => read_json::<CreatedFile>(response).await,
            Err(e) => Err(e.into()),
        };
        match created {
            Ok(created) => {
                progress.advance(size);
                progress.finish();
                Ok(created)
            }
            Err(e) => {
                progress.abandon();
                Err(e)
            }
        }
    }

    async fn upload_sliced(
        &self,
        local: &Path,
        remote: &str,
        options: &TransferOptions,
    ) -> Result<CreatedFile> {
        let slice_size = self.pan.slice_size();
        let path = local.to_path_buf();
        let digest = tokio::task::spawn_blocking(move || FileDigest::compute(path, slice_size))
            .await
            .map_err(|e| PanError::Io(std::io::Error::other(e)))??;

        let precreate = self.precreate(remote, &digest, options).await?;
        if precreate.return_type == 2 {
            info!(remote, "content already on server, upload skipped");
            return Ok(precreate.info.unwrap_or(CreatedFile {
                fs_id: 0,
                path: remote.to_string(),
                size: digest.size,
                md5: Some(digest.content_md5.clone()),
            }));
        }

        let server = self.locate_server(remote, &precreate.uploadid).await?;
        let pending = pending_slices(&precreate.block_list, digest.block_list.len());
        debug!(
            remote,
            uploadid = %precreate.uploadid,
            slices = pending.len(),
            "uploading slices"
        );

        let progress = TransferProgress::new(
            digest.size,
            remote_path::file_name(remote),
            options.verbose,
        );
        let mut file = tokio::fs::File::open(local).await?;
        for partseq in pending {
            let offset = partseq as u64 * slice_size;
            let len = slice_size.min(digest.size - offset);
            let result = self
                .upload_slice(&mut file, &server, remote, &precreate.uploadid, partseq, offset, len)
                .await
                .and_then(|md5| verify_slice(partseq, &digest.block_list[partseq], md5));
            if let Err(e) = result {
                progress.abandon();
                return Err(e);
            }
            progress.advance(len);
        }
        progress.finish();

        self.create(remote, &digest, &precreate.uploadid, options).await
    }

    async fn precreate(
        &self,
        remote: &str,
        digest: &FileDigest,
        options: &TransferOptions,
    ) -> Result<PrecreateResponse> {
        let url = format!("{}/rest/2.0/xpan/file", self.pan.endpoints().api);
        self.pan
            .post_form_json(
                &url,
                &[("method", "precreate".to_string())],
                &[
                    ("path", remote.to_string()),
                    ("size", digest.size.to_string()),
                    ("isdir", "0".to_string()),
                    ("block_list", digest.block_list_json()),
                    ("autoinit", "1".to_string()),
                    ("rtype", rtype(options).to_string()),
                    ("content-md5", digest.content_md5.clone()),
                    ("slice-md5", digest.slice_md5.clone()),
                ],
            )
            .await
    }

    /// Ask for an upload host, falling back to the default PCS host.
    async fn locate_server(&self, remote: &str, uploadid: &str) -> Result<String> {
        let url = format!("{}/rest/2.0/pcs/file", self.pan.endpoints().pcs);
        let located: LocateUploadResponse = self
            .pan
            .get_json(
                &url,
                &[
                    ("method", "locateupload".to_string()),
                    ("appid", PCS_APP_ID.to_string()),
                    ("path", remote.to_string()),
                    ("uploadid", uploadid.to_string()),
                    ("upload_version", "2.0".to_string()),
                ],
            )
            .await?;

        match located.pick_server() {
            Some(server) => Ok(server.to_string()),
            None => {
                warn!("no upload server offered, using default host");
                Ok(self.pan.endpoints().pcs.clone())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_slice(
        &self,
        file: &mut tokio::fs::File,
        server: &str,
        remote: &str,
        uploadid: &str,
        partseq: usize,
        offset: u64,
        len: u64,
    ) -> Result<String> {
        let mut buffer = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buffer).await?;

        let token = self.pan.auth().get_access_token().await?;
        let part = Part::bytes(buffer)
            .file_name("part")
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        let partseq_param = partseq.to_string();
        debug!(partseq, offset, len, "uploading slice");
        let response = self
            .pan
            .http()
            .post(format!("{}/rest/2.0/pcs/superfile2", server))
            .query(&[
                ("method", "upload"),
                ("type", "tmpfile"),
                ("path", remote),
                ("uploadid", uploadid),
                ("partseq", partseq_param.as_str()),
                ("access_token", token.as_str()),
            ])
            .multipart(form)
            .send()
            .await?;

        let part: SlicePartResponse = read_json(response).await?;
        Ok(part.md5)
    }

    async fn create(
        &self,
        remote: &str,
        digest: &FileDigest,
        uploadid: &str,
        options: &TransferOptions,
    ) -> Result<CreatedFile> {
        let url = format!("{}/rest/2.0/xpan/file", self.pan.endpoints().api);
        self.pan
            .post_form_json(
                &url,
                &[("method", "create".to_string())],
                &[
                    ("path", remote.to_string()),
                    ("size", digest.size.to_string()),
                    ("isdir", "0".to_string()),
                    ("block_list", digest.block_list_json()),
                    ("uploadid", uploadid.to_string()),
                    ("rtype", rtype(options).to_string()),
                ],
            )
            .await
    }
}

/// Rename policy for the xpan endpoints: 3 overwrites, 1 renames on conflict.
fn rtype(options: &TransferOptions) -> &'static str {
    if options.overwrite {
        "3"
    } else {
        "1"
    }
}

/// Conflict policy for the single-request PCS upload.
fn ondup(options: &TransferOptions) -> &'static str {
    if options.overwrite {
        "overwrite"
    } else {
        "newcopy"
    }
}

/// Slice indices still needed by the server, in ascending order.
///
/// An empty list from precreate means every slice.
fn pending_slices(requested: &[usize], total: usize) -> Vec<usize> {
    if requested.is_empty() {
        return (0..total).collect();
    }
    let mut pending: Vec<usize> = requested.iter().copied().filter(|&i| i < total).collect();
    pending.sort_unstable();
    pending.dedup();
    pending
}

fn verify_slice(partseq: usize, expected: &str, actual: String) -> Result<()> {
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PanError::ChecksumMismatch {
            part: partseq,
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Walk `root` in name order and pair each file with its remote destination.
///
/// Excluded names prune whole subtrees. Entries that cannot be read are
/// returned as already-failed units.
fn plan_folder(root: &Path, remote: &str, exclude: &ExcludeSet) -> Vec<(PathBuf, FileTransferUnit)> {
    let mut planned = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !exclude.matches(entry.file_name()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let source = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                warn!(path = %source.display(), error = %e, "cannot read entry");
                let mut unit = FileTransferUnit::new(source.display().to_string(), remote.to_string(), 0);
                unit.fail(e);
                planned.push((source, unit));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => continue,
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let unit = FileTransferUnit::new(
            entry.path().display().to_string(),
            remote_path::join(remote, &relative),
            size,
        );
        planned.push((entry.into_path(), unit));
    }

    planned
}

/// Compiled exclude patterns, matched against single path components.
struct ExcludeSet {
    patterns: Vec<Pattern>,
}

impl ExcludeSet {
    fn new(raw: &[String]) -> Result<Self> {
        let mut patterns = Vec::new();
        for pattern in raw {
            for expanded in expand_braces(pattern) {
                patterns.push(Pattern::new(&expanded)?);
            }
        }
        Ok(Self { patterns })
    }

    fn matches(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy();
        self.patterns.iter().any(|p| p.matches(&name))
    }
}

/// Expand brace patterns like `*.{log,tmp}` into multiple patterns.
fn expand_braces(pattern: &str) -> Vec<String> {
    if let Some(start) = pattern.find('{') {
        if let Some(end) = pattern[start..].find('}') {
            let end = start + end;
            let prefix = &pattern[..start];
            let suffix = &pattern[end + 1..];
            let alternatives = &pattern[start + 1..end];

            return alternatives
                .split(',')
                .flat_map(|alt| expand_braces(&format!("{}{}{}", prefix, alt.trim(), suffix)))
                .collect();
        }
    }

    vec![pattern.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_expand_braces() {
        assert_eq!(expand_braces("*.{log,tmp}"), vec!["*.log", "*.tmp"]);
        assert_eq!(
            expand_braces("{a,b}_{1,2}"),
            vec!["a_1", "a_2", "b_1", "b_2"]
        );
        assert_eq!(expand_braces(".git"), vec![".git"]);
    }

    #[test]
    fn test_exclude_set_matches_names() {
        let set = ExcludeSet::new(&["*.{log,tmp}".to_string(), ".git".to_string()]).unwrap();
        assert!(set.matches(OsStr::new("debug.log")));
        assert!(set.matches(OsStr::new("x.tmp")));
        assert!(set.matches(OsStr::new(".git")));
        assert!(!set.matches(OsStr::new("main.rs")));
    }

    #[test]
    fn test_exclude_set_rejects_bad_pattern() {
        assert!(matches!(
            ExcludeSet::new(&["[".to_string()]),
            Err(PanError::Pattern(_))
        ));
    }

    #[test]
    fn test_pending_slices() {
        assert_eq!(pending_slices(&[], 3), vec![0, 1, 2]);
        assert_eq!(pending_slices(&[2, 0, 2, 7], 3), vec![0, 2]);
    }

    #[test]
    fn test_conflict_policy() {
        let keep = TransferOptions::new();
        let replace = TransferOptions::new().overwrite(true);
        assert_eq!((rtype(&keep), ondup(&keep)), ("1", "newcopy"));
        assert_eq!((rtype(&replace), ondup(&replace)), ("3", "overwrite"));
    }

    #[test]
    fn test_verify_slice() {
        assert!(verify_slice(0, "abc", "ABC".to_string()).is_ok());
        assert!(matches!(
            verify_slice(4, "abc", "def".to_string()),
            Err(PanError::ChecksumMismatch { part: 4, .. })
        ));
    }

    #[test]
    fn test_plan_folder_keeps_relative_paths_and_prunes_excluded() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/.git")).unwrap();
        fs::create_dir_all(dir.path().join("logs")).unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "aa").unwrap();
        fs::write(dir.path().join("sub/c.txt"), "c").unwrap();
        fs::write(dir.path().join("sub/.git/HEAD"), "ref").unwrap();
        fs::write(dir.path().join("logs/run.log"), "x").unwrap();
        fs::write(dir.path().join("skip.tmp"), "x").unwrap();

        let exclude = ExcludeSet::new(&["{.git,logs}".to_string(), "*.tmp".to_string()]).unwrap();
        let planned = plan_folder(dir.path(), "/backup", &exclude);
        let destinations: Vec<&str> = planned.iter().map(|(_, u)| u.destination.as_str()).collect();

        assert_eq!(
            destinations,
            vec!["/backup/a.txt", "/backup/b.txt", "/backup/sub/c.txt"]
        );
        assert_eq!(planned[0].1.size, 2);
    }
}
