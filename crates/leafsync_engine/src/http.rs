//! HTTP transport implementation.
//!
//! This module talks to the remote service over its web endpoints. The
//! actual HTTP client and the realtime socket are abstracted via traits so
//! the CLI can plug in reqwest and tungstenite while tests plug in canned
//! responses.

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteTransport;
use bytes::Bytes;
use leafsync_protocol::{
    decode_file_diff, decode_filetree_diff, decode_root_folder, DiffOp, FiletreeDiffEntry,
    FolderNode, RemoteObjectId, RevisionPage,
};
use parking_lot::RwLock;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
    /// DELETE.
    Delete,
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpBody {
    /// No body.
    Empty,
    /// URL-encoded form fields.
    Form(Vec<(String, String)>),
    /// Multipart form with one file part.
    Multipart {
        /// Plain text fields.
        fields: Vec<(String, String)>,
        /// Name of the file part.
        file_field: String,
        /// File name sent with the file part.
        file_name: String,
        /// File contents.
        contents: Bytes,
    },
}

/// A request handed to an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL, query included.
    pub url: String,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Body.
    pub body: HttpBody,
}

impl HttpRequest {
    fn new(method: HttpMethod, url: String) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: HttpBody::Empty,
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn body(mut self, body: HttpBody) -> Self {
        self.body = body;
        self
    }
}

/// A response returned by an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Bytes,
    /// Parsed `Retry-After` header, if any.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    /// Creates a response with no `Retry-After` hint.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations keep session cookies between calls; the transport
/// relies on the login cookie being replayed on every later request.
pub trait HttpClient: Send + Sync {
    /// Sends a request. `Err` means no response was received at all.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// One open realtime socket.
pub trait SocketSession {
    /// Receives the next text frame; `None` once the socket is closed.
    fn recv_text(&mut self) -> Result<Option<String>, String>;
}

/// Opens realtime sockets to the remote.
pub trait SocketConnector: Send + Sync {
    /// Connects to a `wss://` URL.
    fn connect(&self, url: &str) -> Result<Box<dyn SocketSession>, String>;
}

/// Login credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Login email.
    pub email: String,
    /// Password.
    pub password: String,
}

const JOIN_PROJECT_EVENT: &str = "joinProjectResponse";
const EVENT_PREFIX: &str = "5:::";
const MAX_SOCKET_FRAMES: usize = 256;

/// HTTP-based remote transport.
pub struct HttpTransport<C: HttpClient, S: SocketConnector> {
    /// Base URL of the service (e.g., "https://latex.example.com").
    base_url: String,
    project_id: String,
    client: C,
    socket: S,
    /// Per-session freshness token, scraped on first use.
    csrf_token: RwLock<Option<String>>,
}

impl<C: HttpClient, S: SocketConnector> HttpTransport<C, S> {
    /// Creates a new HTTP transport for one project.
    pub fn new(base_url: impl Into<String>, project_id: impl Into<String>, client: C, socket: S) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            client,
            socket,
            csrf_token: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn project_url(&self) -> String {
        format!("{}/project/{}", self.base_url, self.project_id)
    }

    /// Logs in with the form flow: fetch the login page, scrape its hidden
    /// `_csrf` field, then post the credentials.
    pub fn login(&self, credentials: &Credentials) -> SyncResult<()> {
        let login_url = format!("{}/login", self.base_url);
        info!(user = %credentials.email, "logging in");

        let page = self.execute(HttpRequest::new(HttpMethod::Get, login_url.clone()))?;
        let token = scrape(&page.body, r#"name="_csrf"[^>]*value="([^"]+)""#)
            .or_else(|| scrape(&page.body, r#"value="([^"]+)"[^>]*name="_csrf""#))
            .ok_or_else(|| SyncError::RemoteUnavailable("login page has no _csrf field".into()))?;

        let form = vec![
            ("email".to_string(), credentials.email.clone()),
            ("password".to_string(), credentials.password.clone()),
            ("_csrf".to_string(), token),
        ];
        self.execute(HttpRequest::new(HttpMethod::Post, login_url).body(HttpBody::Form(form)))?;
        debug!("login accepted");
        Ok(())
    }

    fn csrf_token(&self) -> SyncResult<String> {
        if let Some(token) = self.csrf_token.read().as_ref() {
            return Ok(token.clone());
        }
        let page = self.execute(HttpRequest::new(HttpMethod::Get, self.project_url()))?;
        let token = scrape(&page.body, r#"name="ol-csrfToken"\s+content="([^"]+)""#)
            .ok_or_else(|| {
                SyncError::RemoteUnavailable("project page has no ol-csrfToken meta tag".into())
            })?;
        debug!("fetched freshness token");
        *self.csrf_token.write() = Some(token.clone());
        Ok(token)
    }

    /// A request carrying the freshness token and the project as referer.
    fn authorized(&self, method: HttpMethod, url: String, accept: &str) -> SyncResult<HttpRequest> {
        let mut request = HttpRequest::new(method, url)
            .header("Accept", accept)
            .header("Referer", self.project_url())
            .header("X-CSRF-TOKEN", self.csrf_token()?);
        if method != HttpMethod::Get {
            request = request.header("Origin", self.base_url.clone());
        }
        Ok(request)
    }

    fn execute(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let url = request.url.clone();
        let response = self
            .client
            .send(request)
            .map_err(|e| SyncError::RemoteUnavailable(format!("{}: {}", url, e)))?;

        match response.status {
            _ if response.is_success() => Ok(response),
            429 => {
                let retry_after = response.retry_after.unwrap_or(Duration::from_secs(60));
                warn!(url = %url, ?retry_after, "remote rate limit hit");
                Err(SyncError::RateLimited { retry_after })
            }
            status => Err(SyncError::RemoteUnavailable(format!(
                "{} returned HTTP {}",
                url, status
            ))),
        }
    }

    fn fetch_root_folder(&self) -> SyncResult<FolderNode> {
        let handshake = self.execute(HttpRequest::new(
            HttpMethod::Get,
            format!("{}/socket.io/1/?projectId={}", self.base_url, self.project_id),
        ))?;
        let text = String::from_utf8_lossy(&handshake.body);
        let sid = text.split(':').next().unwrap_or_default().trim();
        if sid.is_empty() {
            return Err(SyncError::RemoteUnavailable(
                "socket handshake returned no session id".into(),
            ));
        }

        let ws_base = match self.base_url.strip_prefix("https://") {
            Some(rest) => format!("wss://{}", rest),
            None => format!("ws://{}", self.base_url.trim_start_matches("http://")),
        };
        let url = format!(
            "{}/socket.io/1/websocket/{}?projectId={}",
            ws_base, sid, self.project_id
        );
        debug!(url = %url, "opening realtime socket");
        let mut session = self.socket.connect(&url).map_err(SyncError::RemoteUnavailable)?;

        for _ in 0..MAX_SOCKET_FRAMES {
            let Some(frame) = session.recv_text().map_err(SyncError::RemoteUnavailable)? else {
                break;
            };
            let Some(payload) = frame.strip_prefix(EVENT_PREFIX) else {
                continue;
            };
            let event: serde_json::Value = serde_json::from_str(payload)
                .map_err(|e| SyncError::Protocol(e.into()))?;
            let name = event.get("name").and_then(|n| n.as_str()).unwrap_or_default();
            debug!(event = name, "socket event");
            if name == JOIN_PROJECT_EVENT {
                return Ok(decode_root_folder(&event)?);
            }
        }
        Err(SyncError::RemoteUnavailable(format!(
            "socket closed before {}",
            JOIN_PROJECT_EVENT
        )))
    }
}

impl<C: HttpClient, S: SocketConnector> RemoteTransport for HttpTransport<C, S> {
    fn revisions_page(&self, before: Option<i64>) -> SyncResult<RevisionPage> {
        let url = match before {
            Some(ts) => format!("{}/updates?before={}", self.project_url(), ts),
            None => format!("{}/updates", self.project_url()),
        };
        let response = self.execute(HttpRequest::new(HttpMethod::Get, url))?;
        Ok(RevisionPage::from_json(&response.body)?)
    }

    fn filetree_diff(&self, from: u64, to: u64) -> SyncResult<Vec<FiletreeDiffEntry>> {
        let url = format!("{}/filetree/diff?from={}&to={}", self.project_url(), from, to);
        let response = self.execute(self.authorized(HttpMethod::Get, url, "application/json")?)?;
        Ok(decode_filetree_diff(&response.body)?)
    }

    fn file_diff(&self, from: u64, to: u64, pathname: &str) -> SyncResult<Vec<DiffOp>> {
        let url = format!(
            "{}/diff?from={}&to={}&pathname={}",
            self.project_url(),
            from,
            to,
            urlencoding::encode(pathname)
        );
        let response = self.execute(self.authorized(HttpMethod::Get, url, "application/json")?)?;
        Ok(decode_file_diff(&response.body)?)
    }

    fn download_archive(&self, version: Option<u64>) -> SyncResult<Bytes> {
        let url = match version {
            Some(v) => format!("{}/version/{}/zip", self.project_url(), v),
            None => format!("{}/download/zip", self.project_url()),
        };
        let response = self.execute(HttpRequest::new(HttpMethod::Get, url))?;
        Ok(response.body)
    }

    fn folder_tree(&self) -> SyncResult<FolderNode> {
        self.fetch_root_folder()
    }

    fn upload(&self, folder_id: &str, file_name: &str, contents: Bytes) -> SyncResult<()> {
        let url = format!(
            "{}/upload?folder_id={}",
            self.project_url(),
            urlencoding::encode(folder_id)
        );
        let body = HttpBody::Multipart {
            fields: vec![
                ("relativePath".to_string(), "null".to_string()),
                ("type".to_string(), "application/octet-stream".to_string()),
                ("name".to_string(), file_name.to_string()),
            ],
            file_field: "qqfile".to_string(),
            file_name: file_name.to_string(),
            contents,
        };
        self.execute(self.authorized(HttpMethod::Post, url, "*/*")?.body(body))?;
        Ok(())
    }

    fn create_folder(&self, parent_id: &str, name: &str) -> SyncResult<String> {
        let url = format!("{}/folder", self.project_url());
        let form = vec![
            ("name".to_string(), name.to_string()),
            ("parent_folder_id".to_string(), parent_id.to_string()),
        ];
        let response = self.execute(
            self.authorized(HttpMethod::Post, url, "application/json")?
                .body(HttpBody::Form(form)),
        )?;
        let created: serde_json::Value =
            serde_json::from_slice(&response.body).map_err(|e| SyncError::Protocol(e.into()))?;
        created
            .get("_id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                SyncError::Protocol(leafsync_protocol::ProtocolError::MissingField {
                    field: "_id",
                    context: format!("created folder `{}`", name),
                })
            })
    }

    fn delete(&self, object: &RemoteObjectId) -> SyncResult<()> {
        let url = format!("{}/{}/{}", self.project_url(), object.kind, object.id);
        self.execute(self.authorized(HttpMethod::Delete, url, "application/json")?)?;
        Ok(())
    }
}

fn scrape(body: &[u8], pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    let text = String::from_utf8_lossy(body);
    re.captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
