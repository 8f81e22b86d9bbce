use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::warn;

use crate::domain::{FileId, FolderId};
use crate::error::BiomapError;

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const SHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
const GOOGLE_NATIVE_PREFIX: &str = "application/vnd.google-apps";

#[derive(Debug, Clone)]
pub struct DriveEntry {
    pub id: FileId,
    pub name: String,
    pub mime_type: String,
}

impl DriveEntry {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    pub fn is_spreadsheet(&self) -> bool {
        self.mime_type == SHEET_MIME
    }

    /// Google-native document that has no byte content to download.
    pub fn is_google_native(&self) -> bool {
        self.mime_type.starts_with(GOOGLE_NATIVE_PREFIX)
    }

    /// Extension of the original upload, dot included, empty when none.
    pub fn extension(&self) -> &str {
        match self.name.rfind('.') {
            Some(index) if index > 0 => &self.name[index..],
            _ => "",
        }
    }
}

pub trait DriveClient: Send + Sync {
    fn list_folder(&self, folder: &FolderId) -> Result<Vec<DriveEntry>, BiomapError>;
    fn download_file(&self, id: &FileId, destination: &Path) -> Result<(), BiomapError>;
    fn export_sheet_csv(&self, id: &FileId, destination: &Path) -> Result<(), BiomapError>;
    fn delete_file(&self, id: &FileId) -> Result<(), BiomapError>;
}

/// Drive v3 REST client authenticated with a pre-obtained bearer token.
/// Token acquisition (the OAuth consent dance) happens outside this tool.
#[derive(Clone, Debug)]
pub struct HttpDriveClient {
    client: Client,
}

impl HttpDriveClient {
    pub fn new(token: &str) -> Result<Self, BiomapError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(BiomapError::MissingToken("token is empty".to_string()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("biomap/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| BiomapError::DriveHttp(err.to_string()))?,
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| BiomapError::MissingToken("token contains invalid bytes".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| BiomapError::DriveHttp(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_token_file(path: &Path) -> Result<Self, BiomapError> {
        let token = std::fs::read_to_string(path)
            .map_err(|err| BiomapError::MissingToken(format!("{}: {err}", path.display())))?;
        Self::new(&token)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, BiomapError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "drive request failed".to_string());
        Err(BiomapError::DriveStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, BiomapError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(BiomapError::DriveHttp(err.to_string()));
                }
            }
        }
    }

    fn save_body(
        mut response: reqwest::blocking::Response,
        destination: &Path,
    ) -> Result<(), BiomapError> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| BiomapError::Filesystem(err.to_string()))?;
        }
        let mut file =
            File::create(destination).map_err(|err| BiomapError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| BiomapError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FileListPage {
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<FileListEntry>,
}

#[derive(Debug, Deserialize)]
struct FileListEntry {
    id: String,
    name: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

impl DriveClient for HttpDriveClient {
    fn list_folder(&self, folder: &FolderId) -> Result<Vec<DriveEntry>, BiomapError> {
        let query = format!("'{}' in parents and trashed = false", folder.as_str());
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self.send_with_retries(|| {
                let mut request = self.client.get(FILES_URL).query(&[
                    ("q", query.as_str()),
                    ("pageSize", "1000"),
                    ("fields", "nextPageToken, files(id, name, mimeType)"),
                ]);
                if let Some(token) = &page_token {
                    request = request.query(&[("pageToken", token.as_str())]);
                }
                request
            })?;
            let response = Self::handle_status(response)?;
            let page: FileListPage = response
                .json()
                .map_err(|err| BiomapError::DriveHttp(err.to_string()))?;

            for entry in page.files {
                match FileId::from_str(&entry.id) {
                    Ok(id) => entries.push(DriveEntry {
                        id,
                        name: entry.name,
                        mime_type: entry.mime_type,
                    }),
                    Err(_) => warn!(id = entry.id, "skipping entry with unusable id"),
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(entries)
    }

    fn download_file(&self, id: &FileId, destination: &Path) -> Result<(), BiomapError> {
        let url = format!("{FILES_URL}/{}", id.as_str());
        let response =
            self.send_with_retries(|| self.client.get(&url).query(&[("alt", "media")]))?;
        let response = Self::handle_status(response)?;
        Self::save_body(response, destination)
    }

    fn export_sheet_csv(&self, id: &FileId, destination: &Path) -> Result<(), BiomapError> {
        let url = format!("{FILES_URL}/{}/export", id.as_str());
        let response =
            self.send_with_retries(|| self.client.get(&url).query(&[("mimeType", "text/csv")]))?;
        let response = Self::handle_status(response)?;
        Self::save_body(response, destination)
    }

    fn delete_file(&self, id: &FileId) -> Result<(), BiomapError> {
        let url = format!("{FILES_URL}/{}", id.as_str());
        let response = self.send_with_retries(|| self.client.delete(&url))?;
        Self::handle_status(response)?;
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
