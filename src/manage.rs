//! Remote file management: copy, move, rename, delete, keyword search and
//! listings by file category.

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::{PanClient, LIST_PAGE_SIZE};
use crate::error::{PanError, Result};
use crate::models::{
    error_for_code, Category, CategoryCount, CategoryInfoResponse, FileManagerResponse,
    FileManagerResult, ListAllResponse, MediaListResponse, RemoteEntry, SearchResponse,
};
use crate::remote_path;

/// Items accepted by one `filemanager` request.
const FILEMANAGER_BATCH: usize = 100;

/// Results per search page; the endpoint does not accept other values.
const SEARCH_PAGE_SIZE: usize = 500;

/// Longest keyword the search endpoint accepts, in characters.
const MAX_KEYWORD_CHARS: usize = 30;

/// What the server does when the destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDup {
    #[default]
    Fail,
    NewCopy,
    Overwrite,
    Skip,
}

impl OnDup {
    fn as_str(self) -> &'static str {
        match self {
            OnDup::Fail => "fail",
            OnDup::NewCopy => "newcopy",
            OnDup::Overwrite => "overwrite",
            OnDup::Skip => "skip",
        }
    }
}

/// One operation of a `filemanager` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOperation {
    /// Copy `path` into the directory `dest` as `newname`.
    Copy {
        path: String,
        dest: String,
        newname: String,
    },
    /// Move `path` into the directory `dest` as `newname`.
    Move {
        path: String,
        dest: String,
        newname: String,
    },
    /// Rename `path` in place.
    Rename { path: String, newname: String },
    Delete { path: String },
}

impl FileOperation {
    fn opera(&self) -> &'static str {
        match self {
            FileOperation::Copy { .. } => "copy",
            FileOperation::Move { .. } => "move",
            FileOperation::Rename { .. } => "rename",
            FileOperation::Delete { .. } => "delete",
        }
    }

    /// Validate the paths and build the `filelist` element.
    fn to_value(&self) -> Result<Value> {
        Ok(match self {
            FileOperation::Copy {
                path,
                dest,
                newname,
            }
            | FileOperation::Move {
                path,
                dest,
                newname,
            } => json!({
                "path": remote_path::normalize(path)?,
                "dest": remote_path::normalize(dest)?,
                "newname": checked_name(newname)?,
            }),
            FileOperation::Rename { path, newname } => json!({
                "path": remote_path::normalize(path)?,
                "newname": checked_name(newname)?,
            }),
            FileOperation::Delete { path } => {
                let path = remote_path::normalize(path)?;
                if path == "/" {
                    return Err(PanError::InvalidPath(path));
                }
                Value::String(path)
            }
        })
    }
}

fn checked_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(PanError::InvalidArgument(format!("bad file name: {:?}", name)));
    }
    Ok(name)
}

impl PanClient {
    /// Run a batch of file operations of one kind.
    ///
    /// Batches larger than the provider limit are sent in several requests.
    /// The first item the server reports as failed becomes the error.
    ///
    /// # Arguments
    /// * `operations` - Operations to run; all must be the same kind
    /// * `ondup` - Conflict policy for copy and move destinations
    pub async fn filemanager(
        &self,
        operations: &[FileOperation],
        ondup: OnDup,
    ) -> Result<Vec<FileManagerResult>> {
        let Some(first) = operations.first() else {
            return Ok(Vec::new());
        };
        let opera = first.opera();
        if operations.iter().any(|op| op.opera() != opera) {
            return Err(PanError::InvalidArgument(
                "a filemanager batch cannot mix operations".to_string(),
            ));
        }
        let items = operations
            .iter()
            .map(FileOperation::to_value)
            .collect::<Result<Vec<_>>>()?;

        let url = format!("{}/rest/2.0/xpan/file", self.endpoints().api);
        let mut results = Vec::with_capacity(items.len());
        for batch in items.chunks(FILEMANAGER_BATCH) {
            debug!(opera, items = batch.len(), "filemanager");
            let response: FileManagerResponse = self
                .post_form_json(
                    &url,
                    &[
                        ("method", "filemanager".to_string()),
                        ("opera", opera.to_string()),
                    ],
                    &[
                        ("async", "0".to_string()),
                        ("filelist", serde_json::to_string(batch)?),
                        ("ondup", ondup.as_str().to_string()),
                    ],
                )
                .await?;

            if let Some(failed) = response.info.iter().find(|r| r.errno != 0) {
                return Err(error_for_code(
                    failed.errno,
                    format!("{} failed for {}", opera, failed.path),
                ));
            }
            results.extend(response.info);
        }

        info!(opera, items = results.len(), "file operation finished");
        Ok(results)
    }

    /// Copy a file or directory into another directory, keeping its name.
    ///
    /// # Arguments
    /// * `path` - Remote path to copy
    /// * `dest_dir` - Remote directory receiving the copy
    /// * `ondup` - What to do when the destination exists
    pub async fn copy(&self, path: &str, dest_dir: &str, ondup: OnDup) -> Result<()> {
        let path = remote_path::normalize(path)?;
        let op = FileOperation::Copy {
            newname: remote_path::file_name(&path).to_string(),
            dest: dest_dir.to_string(),
            path,
        };
        self.filemanager(&[op], ondup).await.map(drop)
    }

    /// Move a file or directory into another directory, keeping its name.
    ///
    /// # Arguments
    /// * `path` - Remote path to move
    /// * `dest_dir` - Remote directory receiving the entry
    /// * `ondup` - What to do when the destination exists
    pub async fn move_to(&self, path: &str, dest_dir: &str, ondup: OnDup) -> Result<()> {
        let path = remote_path::normalize(path)?;
        let op = FileOperation::Move {
            newname: remote_path::file_name(&path).to_string(),
            dest: dest_dir.to_string(),
            path,
        };
        self.filemanager(&[op], ondup).await.map(drop)
    }

    /// Rename a file or directory in place.
    pub async fn rename(&self, path: &str, new_name: &str) -> Result<()> {
        let op = FileOperation::Rename {
            path: path.to_string(),
            newname: new_name.to_string(),
        };
        self.filemanager(&[op], OnDup::Fail).await.map(drop)
    }

    /// Delete files or directories. The root cannot be deleted.
    pub async fn delete(&self, paths: &[&str]) -> Result<()> {
        let ops: Vec<_> = paths
            .iter()
            .map(|path| FileOperation::Delete {
                path: path.to_string(),
            })
            .collect();
        self.filemanager(&ops, OnDup::Fail).await.map(drop)
    }

    /// Find files whose names contain `keyword`.
    ///
    /// # Arguments
    /// * `keyword` - Text to look for, at most 30 characters
    /// * `dir` - Remote directory to search
    /// * `recursive` - Also search subdirectories
    pub async fn search(&self, keyword: &str, dir: &str, recursive: bool) -> Result<Vec<RemoteEntry>> {
        let keyword = keyword.trim();
        if keyword.is_empty() || keyword.chars().count() > MAX_KEYWORD_CHARS {
            return Err(PanError::InvalidArgument(format!(
                "search keyword must be 1 to {} characters",
                MAX_KEYWORD_CHARS
            )));
        }
        let dir = remote_path::normalize(dir)?;
        let url = format!("{}/rest/2.0/xpan/file", self.endpoints().api);
        let mut entries = Vec::new();
        let mut page = 1;

        loop {
            let query = [
                ("method", "search".to_string()),
                ("key", keyword.to_string()),
                ("dir", dir.clone()),
                ("recursion", if recursive { "1" } else { "0" }.to_string()),
                ("page", page.to_string()),
                ("num", SEARCH_PAGE_SIZE.to_string()),
            ];
            let response: SearchResponse = self
                .with_retry("search", || self.get_json(&url, &query))
                .await?;

            let count = response.list.len();
            entries.extend(response.list);
            if !response.has_more || count == 0 {
                break;
            }
            page += 1;
        }

        Ok(entries)
    }

    /// List files of one category below `dir` through the dedicated endpoint
    /// (`doclist`, `imagelist`, `videolist` or `btlist`).
    ///
    /// # Arguments
    /// * `category` - Document, Image, Video or Torrent
    /// * `dir` - Remote directory to list
    /// * `recursive` - Include files in subdirectories
    pub async fn media_list(
        &self,
        category: Category,
        dir: &str,
        recursive: bool,
    ) -> Result<Vec<RemoteEntry>> {
        let method = category.list_method().ok_or_else(|| {
            PanError::InvalidArgument(format!("no dedicated listing for {:?}", category))
        })?;
        let dir = remote_path::normalize(dir)?;
        let url = format!("{}/rest/2.0/xpan/file", self.endpoints().api);
        let mut entries = Vec::new();
        let mut page = 1;

        loop {
            let query = [
                ("method", method.to_string()),
                ("parent_path", dir.clone()),
                ("recursion", if recursive { "1" } else { "0" }.to_string()),
                ("order", "name".to_string()),
                ("desc", "0".to_string()),
                ("page", page.to_string()),
                ("num", LIST_PAGE_SIZE.to_string()),
            ];
            let response: MediaListResponse = self
                .with_retry(method, || self.get_json(&url, &query))
                .await?;

            let count = response.info.len();
            entries.extend(response.info);
            if count < LIST_PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(entries)
    }

    /// List files of the given categories below `dir` with `categorylist`.
    ///
    /// # Arguments
    /// * `categories` - One or more categories
    /// * `dir` - Remote directory to list
    /// * `recursive` - Include files in subdirectories
    pub async fn category_list(
        &self,
        categories: &[Category],
        dir: &str,
        recursive: bool,
    ) -> Result<Vec<RemoteEntry>> {
        if categories.is_empty() {
            return Err(PanError::InvalidArgument("no category given".to_string()));
        }
        let codes = categories
            .iter()
            .map(|c| c.code().to_string())
            .collect::<Vec<_>>()
            .join(",");
        let dir = remote_path::normalize(dir)?;
        let url = format!("{}/rest/2.0/xpan/multimedia", self.endpoints().api);
        let mut entries = Vec::new();
        let mut cursor = 0;

        loop {
            let query = [
                ("method", "categorylist".to_string()),
                ("category", codes.clone()),
                ("parent_path", dir.clone()),
                ("recursion", if recursive { "1" } else { "0" }.to_string()),
                ("show_dir", "0".to_string()),
                ("start", cursor.to_string()),
                ("limit", LIST_PAGE_SIZE.to_string()),
            ];
            let page: ListAllResponse = self
                .with_retry("categorylist", || self.get_json(&url, &query))
                .await?;

            entries.extend(page.list);
            if !page.has_more || page.cursor <= cursor {
                break;
            }
            cursor = page.cursor;
        }

        Ok(entries)
    }

    /// Count the files of one category below `dir`.
    pub async fn category_info(
        &self,
        category: Category,
        dir: &str,
        recursive: bool,
    ) -> Result<CategoryCount> {
        let dir = remote_path::normalize(dir)?;
        let url = format!("{}/api/categoryinfo", self.endpoints().api);
        let query = [
            ("category", category.code().to_string()),
            ("parent_path", dir),
            ("recursion", if recursive { "1" } else { "0" }.to_string()),
        ];
        let response: CategoryInfoResponse = self
            .with_retry("categoryinfo", || self.get_json(&url, &query))
            .await?;

        Ok(response
            .info
            .get(&category.code().to_string())
            .cloned()
            .unwrap_or_default())
    }
}
