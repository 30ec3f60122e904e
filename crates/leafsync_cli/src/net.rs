//! reqwest and tungstenite implementations of the engine's network seams.
//!
//! Both share one cookie jar so the realtime socket is opened with the
//! session established by the HTTP login.

use leafsync_engine::{
    HttpBody, HttpClient, HttpMethod, HttpRequest, HttpResponse, SocketConnector, SocketSession,
};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::RETRY_AFTER;
use reqwest::Url;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::header::COOKIE;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

const USER_AGENT: &str = concat!("leafsync/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Blocking HTTP client with a persistent cookie jar.
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Creates a client storing cookies in `jar`.
    pub fn new(jar: Arc<Jar>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .cookie_provider(jar)
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        trace!(method = ?request.method, url = %request.url, "http request");
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            HttpBody::Empty => builder,
            HttpBody::Form(fields) => builder.form(&fields),
            HttpBody::Multipart {
                fields,
                file_field,
                file_name,
                contents,
            } => {
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(name, value);
                }
                let part = Part::bytes(contents.to_vec()).file_name(file_name);
                builder.multipart(form.part(file_field, part))
            }
        };

        let response = builder.send().map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.bytes().map_err(|e| e.to_string())?;
        trace!(status, bytes = body.len(), "http response");
        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}

/// Parses a `Retry-After` header given in seconds. HTTP dates are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Opens websockets carrying the session cookies of a shared jar.
pub struct WsConnector {
    jar: Arc<Jar>,
}

impl WsConnector {
    /// Creates a connector reading cookies from `jar`.
    pub fn new(jar: Arc<Jar>) -> Self {
        Self { jar }
    }

    /// Cookies stored for the HTTP origin of a socket URL.
    fn cookies_for(&self, url: &str) -> Option<reqwest::header::HeaderValue> {
        let http_url = http_origin(url)?;
        self.jar.cookies(&http_url)
    }
}

/// Maps a `ws(s)://` URL to the `http(s)://` URL its cookies belong to.
fn http_origin(url: &str) -> Option<Url> {
    let mapped = if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        url.to_string()
    };
    Url::parse(&mapped).ok()
}

impl SocketConnector for WsConnector {
    fn connect(&self, url: &str) -> Result<Box<dyn SocketSession>, String> {
        let mut request = url.into_client_request().map_err(|e| e.to_string())?;
        if let Some(cookies) = self.cookies_for(url) {
            let value = cookies.to_str().map_err(|e| e.to_string())?;
            let value: tungstenite::http::HeaderValue = value
                .parse()
                .map_err(|e| format!("invalid cookie header: {}", e))?;
            request.headers_mut().insert(COOKIE, value);
        }
        let (socket, response) = tungstenite::connect(request).map_err(|e| e.to_string())?;
        debug!(status = response.status().as_u16(), "socket connected");
        Ok(Box::new(WsSession { socket }))
    }
}

struct WsSession {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl SocketSession for WsSession {
    fn recv_text(&mut self) -> Result<Option<String>, String> {
        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(Some(text)),
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.to_string()),
            }
        }
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        let _ = self.socket.close(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn socket_urls_map_to_http_origins() {
        assert_eq!(
            http_origin("wss://latex.example.com/socket.io/1/websocket/abc")
                .unwrap()
                .as_str(),
            "https://latex.example.com/socket.io/1/websocket/abc"
        );
        assert_eq!(
            http_origin("ws://localhost:3000/x").unwrap().scheme(),
            "http"
        );
        assert!(http_origin("not a url").is_none());
    }

    #[test]
    fn socket_sees_login_cookies() {
        let jar = Arc::new(Jar::default());
        let origin = Url::parse("https://latex.example.com/login").unwrap();
        jar.add_cookie_str("session=abc123; Path=/", &origin);

        let connector = WsConnector::new(jar);
        let cookies = connector
            .cookies_for("wss://latex.example.com/socket.io/1/websocket/sid")
            .unwrap();
        assert_eq!(cookies.to_str().unwrap(), "session=abc123");
        assert!(connector.cookies_for("wss://other.example.com/").is_none());
    }
}
