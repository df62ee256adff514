//! Baidu Netdisk API client.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::config::Endpoints;
use crate::download::DownloadClient;
use crate::error::{PanError, Result};
use crate::models::{
    check_envelope, error_for_code, FileMeta, FileMetasResponse, ListAllResponse, ListResponse,
    Quota, RemoteEntry, UserInfo, VipTier,
};
use crate::remote_path;
use crate::upload::UploadClient;

/// User agent sent with API requests.
pub const USER_AGENT: &str = "pan.baidu.com";

/// Page size for the listing endpoints (the provider's maximum).
pub const LIST_PAGE_SIZE: usize = 1000;

/// Attempts for idempotent listing requests.
const LIST_ATTEMPTS: u32 = 3;

/// Back-off unit between listing attempts; attempt `n` waits `n` units.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Connection setup and each read are bounded, not the whole request, so
/// long transfers are not cut off.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client shared by the API and OAuth calls.
pub(crate) fn build_http_client() -> Client {
    match Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(HTTP_TIMEOUT)
        .read_timeout(HTTP_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "cannot configure HTTP client, using defaults without timeouts");
            Client::new()
        }
    }
}

/// Client for Baidu Netdisk.
///
/// Holds the credential manager; [`PanClient::upload`] and
/// [`PanClient::downfile`] hand out transfer clients borrowing it.
pub struct PanClient {
    auth: Authenticator,
    http: Client,
    slice_size: u64,
    retry_delay: Duration,
}

impl PanClient {
    /// Create a client using the slice size of a normal account.
    ///
    /// # Arguments
    /// * `auth` - Credential manager used for every request
    pub fn new(auth: Authenticator) -> Self {
        Self {
            http: auth.http().clone(),
            auth,
            slice_size: VipTier::Normal.slice_size(),
            retry_delay: RETRY_DELAY,
        }
    }

    /// Create a client and size upload slices after the account's tier.
    pub async fn connect(auth: Authenticator) -> Result<Self> {
        let client = Self::new(auth);
        let user = client.user_info().await?;
        debug!(user = %user.baidu_name, vip_type = user.vip_type, "connected");
        Ok(client.with_slice_size(user.tier().slice_size()))
    }

    /// Override the upload slice size.
    pub fn with_slice_size(mut self, slice_size: u64) -> Self {
        self.slice_size = slice_size.max(1);
        self
    }

    /// Override the back-off unit between listing attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn slice_size(&self) -> u64 {
        self.slice_size
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn endpoints(&self) -> &Endpoints {
        self.auth.endpoints()
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// Upload operations.
    pub fn upload(&self) -> UploadClient<'_> {
        UploadClient::new(self)
    }

    /// Download operations.
    pub fn downfile(&self) -> DownloadClient<'_> {
        DownloadClient::new(self)
    }

    /// Get account information.
    pub async fn user_info(&self) -> Result<UserInfo> {
        let url = format!("{}/rest/2.0/xpan/nas", self.endpoints().api);
        self.get_json(&url, &[("method", "uinfo".to_string())]).await
    }

    /// Get storage quota.
    pub async fn quota(&self) -> Result<Quota> {
        let url = format!("{}/api/quota", self.endpoints().api);
        self.get_json(
            &url,
            &[
                ("checkfree", "1".to_string()),
                ("checkexpire", "1".to_string()),
            ],
        )
        .await
    }

    /// List the direct children of a directory.
    ///
    /// # Arguments
    /// * `dir` - Remote directory path or `pan.baidu.com` link
    pub async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let dir = remote_path::normalize(dir)?;
        let url = format!("{}/rest/2.0/xpan/file", self.endpoints().api);
        let mut entries = Vec::new();
        let mut start = 0;

        loop {
            let query = [
                ("method", "list".to_string()),
                ("dir", dir.clone()),
                ("order", "name".to_string()),
                ("start", start.to_string()),
                ("limit", LIST_PAGE_SIZE.to_string()),
            ];
            let page: ListResponse = self
                .with_retry("list", || self.get_json(&url, &query))
                .await?;

            let count = page.list.len();
            entries.extend(page.list);
            if count < LIST_PAGE_SIZE {
                break;
            }
            start += count;
        }

        Ok(entries)
    }

    /// List a directory, descending into subdirectories when `recursive`.
    ///
    /// # Arguments
    /// * `path` - Remote directory path or `pan.baidu.com` link
    /// * `recursive` - Include every descendant, not only direct children
    pub async fn list_all(&self, path: &str, recursive: bool) -> Result<Vec<RemoteEntry>> {
        let path = remote_path::normalize(path)?;
        let url = format!("{}/rest/2.0/xpan/multimedia", self.endpoints().api);
        let mut entries = Vec::new();
        let mut cursor = 0;

        loop {
            let query = [
                ("method", "listall".to_string()),
                ("path", path.clone()),
                ("recursion", if recursive { "1" } else { "0" }.to_string()),
                ("start", cursor.to_string()),
                ("limit", LIST_PAGE_SIZE.to_string()),
            ];
            let page: ListAllResponse = self
                .with_retry("listall", || self.get_json(&url, &query))
                .await?;

            entries.extend(page.list);
            if !page.has_more || page.cursor <= cursor {
                break;
            }
            cursor = page.cursor;
        }

        Ok(entries)
    }

    /// Get metadata for files by id, optionally with download links.
    ///
    /// # Arguments
    /// * `fs_ids` - File ids as returned by the listing endpoints
    /// * `dlink` - Also request a download link per file
    pub async fn file_metas(&self, fs_ids: &[u64], dlink: bool) -> Result<Vec<FileMeta>> {
        let url = format!("{}/rest/2.0/xpan/multimedia", self.endpoints().api);
        let fsids = serde_json::to_string(fs_ids)?;
        let query = [
            ("method", "filemetas".to_string()),
            ("fsids", fsids),
            ("dlink", if dlink { "1" } else { "0" }.to_string()),
        ];
        let response: FileMetasResponse = self
            .with_retry("filemetas", || self.get_json(&url, &query))
            .await?;
        Ok(response.list)
    }

    /// Find a file or directory by path.
    pub async fn stat(&self, path: &str) -> Result<RemoteEntry> {
        let path = remote_path::normalize(path)?;
        if path == "/" {
            return Ok(RemoteEntry {
                fs_id: 0,
                path,
                server_filename: String::new(),
                size: 0,
                isdir: true,
                md5: None,
                server_mtime: 0,
            });
        }

        self.list_dir(remote_path::parent(&path))
            .await?
            .into_iter()
            .find(|entry| entry.path == path)
            .ok_or(PanError::NotFound(path))
    }

    /// GET an authenticated API endpoint and decode the JSON body.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = self.auth.get_access_token().await?;
        debug!(url, ?query, "GET");
        let response = self
            .http
            .get(url)
            .query(query)
            .query(&[("access_token", token)])
            .send()
            .await?;
        read_json(response).await
    }

    /// POST a form to an authenticated API endpoint and decode the JSON body.
    pub(crate) async fn post_form_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        form: &[(&str, String)],
    ) -> Result<T> {
        let token = self.auth.get_access_token().await?;
        debug!(url, ?query, "POST");
        let response = self
            .http
            .post(url)
            .query(query)
            .query(&[("access_token", token)])
            .form(form)
            .send()
            .await?;
        read_json(response).await
    }

    pub(crate) async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < LIST_ATTEMPTS => {
                    warn!(attempt, error = %e, "{} failed, retrying", what);
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Decode a provider response, turning error envelopes into [`PanError`].
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) if !status.is_success() => {
            return Err(PanError::RemoteApi {
                code: status.as_u16() as i64,
                message: body,
            })
        }
        Err(e) => return Err(e.into()),
    };

    check_envelope(&value)?;
    if !status.is_success() {
        return Err(error_for_code(status.as_u16() as i64, body));
    }

    Ok(serde_json::from_value(value)?)
}
