//! Google Drive v3 / Sheets v4 / Forms v1 backend over reqwest.
//! Every Drive call passes `supportsAllDrives=true` so shared drives behave like My Drive.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::RemoteTree;
use crate::error::{AppError, AppResult};
use crate::model::{FileNode, FolderNode, PermissionGrant, MIME_FOLDER, MIME_SHORTCUT};
use crate::settings::EffectiveSettings;

const FILE_FIELDS: &str = "id,name,mimeType,parents,trashed,shortcutDetails(targetId)";
const PERMISSION_FIELDS: &str = "id,emailAddress,role,expirationTime";
const PAGE_SIZE: &str = "1000";

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid url: {0}")]
    Url(String),
    #[error("no access token configured")]
    NoToken,
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<DriveError> for AppError {
    fn from(err: DriveError) -> Self {
        let code = match &err {
            DriveError::Transport(_) => "drive_transport",
            DriveError::Status { status: 404, .. } => "not_found",
            DriveError::Status { .. } => "drive_status",
            DriveError::Url(_) => "drive_url",
            DriveError::NoToken => "drive_no_token",
            DriveError::Decode(_) => "drive_decode",
        };
        AppError::remote(code, err.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShortcutDetails {
    target_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    trashed: bool,
    #[serde(default)]
    shortcut_details: Option<ShortcutDetails>,
}

impl From<DriveFile> for FileNode {
    fn from(f: DriveFile) -> Self {
        FileNode {
            id: f.id,
            name: f.name,
            mime_type: f.mime_type,
            parents: f.parents,
            trashed: f.trashed,
            shortcut_target: f.shortcut_details.and_then(|s| s.target_id),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrivePermission {
    id: String,
    email_address: Option<String>,
    role: String,
    expiration_time: Option<String>,
}

impl From<DrivePermission> for PermissionGrant {
    fn from(p: DrivePermission) -> Self {
        PermissionGrant { id: p.id, email_address: p.email_address, role: p.role, expiration_time: p.expiration_time }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionList {
    #[serde(default)]
    permissions: Vec<DrivePermission>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormInfo {
    linked_sheet_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetInfo {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Escape a literal for the Drive `q` language.
pub fn quote_query_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Build the `files.list` query for children of `parent_id`.
pub fn children_query(parent_id: &str, name: Option<&str>, include_trashed: bool) -> String {
    let mut q = format!("'{}' in parents", quote_query_literal(parent_id));
    if !include_trashed {
        q.push_str(" and trashed = false");
    }
    if let Some(n) = name {
        q.push_str(&format!(" and name = '{}'", quote_query_literal(n)));
    }
    q
}

/// 1-based (row, col) to A1 notation, e.g. (1, 2) -> "B1".
pub fn a1(row: u32, col: u32) -> String {
    let mut letters = Vec::new();
    let mut c = col;
    while c > 0 {
        let rem = ((c - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        c = (c - 1) / 26;
    }
    letters.iter().rev().collect::<String>() + &row.to_string()
}

/// Parse an API base URL. A missing trailing slash is added, or `Url::join`
/// would replace the last segment (`.../drive/v3` + `files` -> `.../drive/files`).
pub fn base_url(s: &str) -> Result<Url, DriveError> {
    let s = s.trim();
    let normalized = if s.ends_with('/') { s.to_string() } else { format!("{}/", s) };
    Url::parse(&normalized).map_err(|e| DriveError::Url(format!("{}: {}", s, e)))
}

#[derive(Clone)]
pub struct DriveRemote {
    client: reqwest::Client,
    drive: Url,
    sheets: Url,
    forms: Url,
    token: Option<String>,
}

impl DriveRemote {
    pub fn new(settings: &EffectiveSettings) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
            .map_err(DriveError::from)?;
        Ok(Self {
            client,
            drive: base_url(&settings.drive_api_base)?,
            sheets: base_url(&settings.sheets_api_base)?,
            forms: base_url(&settings.forms_api_base)?,
            token: settings.access_token.clone(),
        })
    }

    fn url(base: &Url, path: &str) -> Result<Url, DriveError> {
        base.join(path).map_err(|e| DriveError::Url(format!("{}{}: {}", base, path, e)))
    }

    fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, DriveError> {
        let token = self.token.as_deref().ok_or(DriveError::NoToken)?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, DriveError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DriveError::Status { status: status.as_u16(), body });
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| DriveError::Decode(e.to_string()))
    }

    async fn send_empty(&self, req: RequestBuilder) -> Result<(), DriveError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DriveError::Status { status: status.as_u16(), body });
        }
        Ok(())
    }

    fn file_path(id: &str) -> String { format!("files/{}", urlencoding::encode(id)) }

    async fn create_file(&self, body: serde_json::Value) -> Result<FileNode, DriveError> {
        let url = Self::url(&self.drive, "files")?;
        let req = self.request(Method::POST, url)?
            .query(&[("supportsAllDrives", "true"), ("fields", FILE_FIELDS)])
            .json(&body);
        let f: DriveFile = self.send(req).await?;
        Ok(f.into())
    }

    async fn spreadsheet_tabs(&self, spreadsheet_id: &str) -> Result<Vec<SheetProperties>, DriveError> {
        let url = Self::url(&self.sheets, &format!("spreadsheets/{}", urlencoding::encode(spreadsheet_id)))?;
        let req = self.request(Method::GET, url)?
            .query(&[("fields", "sheets.properties(sheetId,title,index)")]);
        let info: SpreadsheetInfo = self.send(req).await?;
        Ok(info.sheets.into_iter().map(|s| s.properties).collect())
    }
}

#[async_trait]
impl RemoteTree for DriveRemote {
    async fn list_children(&self, parent_id: &str, name: Option<&str>, include_trashed: bool) -> AppResult<Vec<FileNode>> {
        let q = children_query(parent_id, name, include_trashed);
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let mut out = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let url = Self::url(&self.drive, "files")?;
            let mut req = self.request(Method::GET, url)?.query(&[
                ("q", q.as_str()),
                ("fields", fields.as_str()),
                ("pageSize", PAGE_SIZE),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ]);
            if let Some(tok) = page.as_deref() {
                req = req.query(&[("pageToken", tok)]);
            }
            let list: FileList = self.send(req).await?;
            out.extend(list.files.into_iter().map(FileNode::from));
            match list.next_page_token {
                Some(t) if !t.is_empty() => page = Some(t),
                _ => break,
            }
        }
        debug!(target: "drivesync::drive", "files.list q=\"{}\" -> {} items", q, out.len());
        Ok(out)
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> AppResult<FolderNode> {
        Ok(self.create_file(json!({"name": name, "mimeType": MIME_FOLDER, "parents": [parent_id]})).await?)
    }

    async fn copy_file(&self, source_id: &str, new_name: &str, parent_id: &str) -> AppResult<FileNode> {
        let url = Self::url(&self.drive, &format!("{}/copy", Self::file_path(source_id)))?;
        let req = self.request(Method::POST, url)?
            .query(&[("supportsAllDrives", "true"), ("fields", FILE_FIELDS)])
            .json(&json!({"name": new_name, "parents": [parent_id]}));
        let f: DriveFile = self.send(req).await?;
        Ok(f.into())
    }

    async fn create_shortcut(&self, target_id: &str, name: &str, parent_id: &str) -> AppResult<FileNode> {
        Ok(self.create_file(json!({
            "name": name,
            "mimeType": MIME_SHORTCUT,
            "parents": [parent_id],
            "shortcutDetails": {"targetId": target_id},
        })).await?)
    }

    async fn get_file(&self, file_id: &str) -> AppResult<FileNode> {
        let url = Self::url(&self.drive, &Self::file_path(file_id))?;
        let req = self.request(Method::GET, url)?
            .query(&[("supportsAllDrives", "true"), ("fields", FILE_FIELDS)]);
        let f: DriveFile = self.send(req).await?;
        Ok(f.into())
    }

    async fn list_permissions(&self, file_id: &str) -> AppResult<Vec<PermissionGrant>> {
        let fields = format!("nextPageToken,permissions({})", PERMISSION_FIELDS);
        let mut out = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let url = Self::url(&self.drive, &format!("{}/permissions", Self::file_path(file_id)))?;
            let mut req = self.request(Method::GET, url)?
                .query(&[("supportsAllDrives", "true"), ("fields", fields.as_str()), ("pageSize", "100")]);
            if let Some(tok) = page.as_deref() {
                req = req.query(&[("pageToken", tok)]);
            }
            let list: PermissionList = self.send(req).await?;
            out.extend(list.permissions.into_iter().map(PermissionGrant::from));
            match list.next_page_token {
                Some(t) if !t.is_empty() => page = Some(t),
                _ => break,
            }
        }
        Ok(out)
    }

    async fn create_permission(&self, file_id: &str, email: &str, role: &str) -> AppResult<PermissionGrant> {
        let url = Self::url(&self.drive, &format!("{}/permissions", Self::file_path(file_id)))?;
        let req = self.request(Method::POST, url)?
            .query(&[("supportsAllDrives", "true"), ("fields", PERMISSION_FIELDS)])
            .json(&json!({"type": "user", "role": role, "emailAddress": email}));
        let p: DrivePermission = self.send(req).await?;
        Ok(p.into())
    }

    async fn update_permission(&self, file_id: &str, grant_id: &str, role: &str, expiration_time: &str) -> AppResult<PermissionGrant> {
        let path = format!("{}/permissions/{}", Self::file_path(file_id), urlencoding::encode(grant_id));
        let url = Self::url(&self.drive, &path)?;
        let req = self.request(Method::PATCH, url)?
            .query(&[("supportsAllDrives", "true"), ("fields", PERMISSION_FIELDS)])
            .json(&json!({"role": role, "expirationTime": expiration_time}));
        let p: DrivePermission = self.send(req).await?;
        Ok(p.into())
    }

    async fn form_destination(&self, form_id: &str) -> AppResult<Option<String>> {
        let url = Self::url(&self.forms, &format!("forms/{}", urlencoding::encode(form_id)))?;
        let req = self.request(Method::GET, url)?.query(&[("fields", "linkedSheetId")]);
        let info: FormInfo = self.send(req).await?;
        Ok(info.linked_sheet_id)
    }

    async fn set_form_destination(&self, form_id: &str, spreadsheet_id: &str) -> AppResult<()> {
        // Forms v1 exposes linkedSheetId read-only.
        Err(AppError::unsupported(
            "form_destination_unsupported",
            format!("cannot link form '{}' to spreadsheet '{}' over the Forms REST API; link it once by hand and re-run", form_id, spreadsheet_id),
        ))
    }

    async fn move_response_sheet(&self, spreadsheet_id: &str, form_id: &str, index: usize) -> AppResult<()> {
        let tabs = self.spreadsheet_tabs(spreadsheet_id).await?;
        // Sheets v4 does not expose which tab a form writes to; the response tab carries the default title.
        let tab = tabs.iter()
            .find(|t| t.title.to_ascii_lowercase().starts_with("form responses"))
            .ok_or_else(|| AppError::remote("no_response_sheet", format!("spreadsheet '{}' has no response sheet for form '{}'", spreadsheet_id, form_id)))?;
        if tab.index == index {
            return Ok(());
        }
        let url = Self::url(&self.sheets, &format!("spreadsheets/{}:batchUpdate", urlencoding::encode(spreadsheet_id)))?;
        let req = self.request(Method::POST, url)?.json(&json!({
            "requests": [{
                "updateSheetProperties": {
                    "properties": {"sheetId": tab.sheet_id, "index": index},
                    "fields": "index",
                }
            }]
        }));
        let _: serde_json::Value = self.send(req).await?;
        Ok(())
    }

    async fn read_cell(&self, spreadsheet_id: &str, row: u32, col: u32) -> AppResult<Option<String>> {
        let path = format!("spreadsheets/{}/values/{}", urlencoding::encode(spreadsheet_id), a1(row, col));
        let url = Self::url(&self.sheets, &path)?;
        let req = self.request(Method::GET, url)?;
        let vr: ValueRange = self.send(req).await?;
        Ok(vr.values.first().and_then(|r| r.first()).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    async fn write_cell(&self, spreadsheet_id: &str, row: u32, col: u32, value: &str) -> AppResult<()> {
        let range = a1(row, col);
        let path = format!("spreadsheets/{}/values/{}", urlencoding::encode(spreadsheet_id), range);
        let url = Self::url(&self.sheets, &path)?;
        let req = self.request(Method::PUT, url)?
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({"range": range, "values": [[value]]}));
        self.send_empty(req).await?;
        Ok(())
    }
}
