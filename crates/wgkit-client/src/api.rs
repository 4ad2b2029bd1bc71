//! Provisioning API client
//!
//! hyper HTTP/1.1 over plain TCP or rustls, one connection per request.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT};
use hyper::{Method, Request, StatusCode, Uri};
use rustls::ClientConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// API client errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Server answered {status}: {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

/// Configuration as returned by `POST /api/generate-config`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedConfig {
    pub config: String,
    pub client_public_key: String,
    #[serde(rename = "clientIP")]
    pub client_ip: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// Client for one provisioning server
#[derive(Debug, Clone)]
pub struct ApiClient {
    https: bool,
    host: String,
    port: u16,
    base_path: String,
    timeout: Duration,
}

impl ApiClient {
    /// `base_url` like `http://vpn.example.com:3000`
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let uri: Uri = base_url
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ApiError::InvalidUrl(e.to_string()))?;

        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            _ => return Err(ApiError::InvalidUrl(format!("{}: expected http:// or https://", base_url))),
        };
        let host = uri
            .host()
            .ok_or_else(|| ApiError::InvalidUrl("No host in URL".to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        Ok(Self {
            https,
            host,
            port,
            base_path: uri.path().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log in and return the bearer token
    pub async fn login(&self, email: &str, password: &str) -> Result<String, ApiError> {
        let body = serde_json::to_vec(&LoginRequest { email, password })
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        let response: LoginResponse = self.call(Method::POST, "/api/login", None, Some(body)).await?;

        info!("Logged in as {}", email);
        Ok(response.token)
    }

    /// Ask the server for a fresh client configuration
    pub async fn generate_config(&self, token: &str) -> Result<ProvisionedConfig, ApiError> {
        let config: ProvisionedConfig = self
            .call(Method::POST, "/api/generate-config", Some(token), None)
            .await?;

        info!("Received configuration for {} ({})", config.client_ip, config.client_public_key);
        Ok(config)
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> Result<T, ApiError> {
        let (status, bytes) = tokio::time::timeout(self.timeout, self.request(method, path, token, body))
            .await
            .map_err(|_| ApiError::Timeout)??;

        if !status.is_success() {
            let message = match serde_json::from_slice::<ErrorBody>(&bytes) {
                Ok(ErrorBody {
                    error,
                    details: Some(details),
                }) => format!("{} ({})", error, details),
                Ok(ErrorBody { error, .. }) => error,
                Err(_) => String::from_utf8_lossy(&bytes).trim().to_string(),
            };
            return Err(ApiError::Rejected { status, message });
        }

        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), ApiError> {
        let authority = if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        };

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(format!("{}{}", self.base_path, path))
            .header(HOST, &authority)
            .header(USER_AGENT, concat!("wgkit-client/", env!("CARGO_PKG_VERSION")));
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let stream = tokio::net::TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| ApiError::ConnectionFailed(e.to_string()))?;

        let response = if self.https {
            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let tls_config = ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let connector = TlsConnector::from(Arc::new(tls_config));
            let server_name = rustls::pki_types::ServerName::try_from(self.host.clone())
                .map_err(|_| ApiError::Tls("Invalid server name".to_string()))?;

            let tls_stream = connector
                .connect(server_name, stream)
                .await
                .map_err(|e| ApiError::Tls(e.to_string()))?;

            send(hyper_util::rt::TokioIo::new(tls_stream), request).await?
        } else {
            send(hyper_util::rt::TokioIo::new(stream), request).await?
        };

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?
            .to_bytes();

        debug!("HTTP {} {} -> {} ({} bytes)", method, path, status, bytes.len());
        Ok((status, bytes))
    }
}

async fn send<T>(
    io: T,
    request: Request<Full<Bytes>>,
) -> Result<hyper::Response<hyper::body::Incoming>, ApiError>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ApiError::Http(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!("Connection error: {}", e);
        }
    });

    sender
        .send_request(request)
        .await
        .map_err(|e| ApiError::Http(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn spawn_server() -> String {
        async fn login(Json(body): Json<Value>) -> (axum::http::StatusCode, Json<Value>) {
            if body["password"] == "hunter22" {
                (axum::http::StatusCode::OK, Json(json!({"success": true, "token": "tok-1"})))
            } else {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "Invalid email or password"})),
                )
            }
        }

        async fn generate(headers: HeaderMap) -> (axum::http::StatusCode, Json<Value>) {
            match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                Some("Bearer tok-1") => (
                    axum::http::StatusCode::OK,
                    Json(json!({
                        "success": true,
                        "config": "[Interface]\nPrivateKey = P\n",
                        "clientPublicKey": "PUB",
                        "clientIP": "10.0.0.2/32"
                    })),
                ),
                _ => (
                    axum::http::StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "Invalid or expired token"})),
                ),
            }
        }

        let app = Router::new()
            .route("/api/login", post(login))
            .route("/api/generate-config", post(generate));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_base_url() {
        let client = ApiClient::new("http://vpn.example.com:3000/").unwrap();
        assert_eq!(client.host, "vpn.example.com");
        assert_eq!(client.port, 3000);
        assert_eq!(client.base_path, "");

        let client = ApiClient::new("https://vpn.example.com/wg").unwrap();
        assert!(client.https);
        assert_eq!(client.port, 443);
        assert_eq!(client.base_path, "/wg");

        assert!(matches!(ApiClient::new("ftp://x"), Err(ApiError::InvalidUrl(_))));
        assert!(matches!(ApiClient::new("not a url"), Err(ApiError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_login_and_generate() {
        let client = ApiClient::new(&spawn_server().await).unwrap();

        let token = client.login("ana@example.com", "hunter22").await.unwrap();
        assert_eq!(token, "tok-1");

        let config = client.generate_config(&token).await.unwrap();
        assert_eq!(config.client_ip, "10.0.0.2/32");
        assert_eq!(config.client_public_key, "PUB");
        assert!(config.config.starts_with("[Interface]"));
    }

    #[tokio::test]
    async fn test_rejections_carry_server_message() {
        let client = ApiClient::new(&spawn_server().await).unwrap();

        match client.login("ana@example.com", "wrong").await {
            Err(ApiError::Rejected { status, message }) => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(message, "Invalid email or password");
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert!(matches!(
            client.generate_config("stale").await,
            Err(ApiError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ApiClient::new(&format!("http://{}", addr)).unwrap();
        assert!(matches!(
            client.login("a", "b").await,
            Err(ApiError::ConnectionFailed(_))
        ));
    }
}
