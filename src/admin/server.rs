//! Admin HTTP server
//!
//! Serves the module settings page, its JSON listing and the action
//! endpoint over HTTP/1.

use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admin::actions::{self, ActionRequest};
use crate::admin::auth::{AdminAuthManager, Capability};
use crate::admin::nonce::NonceManager;
use crate::admin::page::render_modules_page;
use crate::admin::types::{ActionResponse, AdminError, ModuleListResponse};
use crate::config::AdminConfig;
use crate::module::ModuleManager;

/// Maximum request body size (64 KiB)
pub const MAX_REQUEST_SIZE: usize = 65_536;

const JSON: &str = "application/json";
const HTML: &str = "text/html; charset=utf-8";

/// Admin HTTP server
pub struct AdminServer {
    addr: SocketAddr,
    manager: Arc<Mutex<ModuleManager>>,
    auth: Arc<AdminAuthManager>,
    nonces: Arc<NonceManager>,
}

impl AdminServer {
    pub fn new(
        addr: SocketAddr,
        manager: Arc<Mutex<ModuleManager>>,
        auth: Arc<AdminAuthManager>,
        nonces: Arc<NonceManager>,
    ) -> Self {
        Self {
            addr,
            manager,
            auth,
            nonces,
        }
    }

    pub fn from_config(config: &AdminConfig, manager: Arc<Mutex<ModuleManager>>) -> Self {
        Self::new(
            config.listen_addr,
            manager,
            Arc::new(AdminAuthManager::from_config(config)),
            Arc::new(NonceManager::from_config(config)),
        )
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn nonces(&self) -> &NonceManager {
        &self.nonces
    }

    /// Bind the configured address and serve until the task is dropped
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Admin server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("New admin connection from {}", addr);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service =
                            service_fn(move |req| Self::handle_request(server.clone(), req, addr));
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!("Admin connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept admin connection: {}", e);
                }
            }
        }
    }

    async fn handle_request(
        server: Arc<Self>,
        req: Request<Incoming>,
        addr: SocketAddr,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let request_id = Uuid::new_v4().to_string();
        let (parts, body) = req.into_parts();
        debug!(
            "Admin {} {} from {} (request_id: {})",
            parts.method,
            parts.uri.path(),
            addr,
            &request_id[..8]
        );

        let body = if parts.method == Method::POST {
            match read_body(&parts.headers, body).await {
                Ok(body) => body,
                Err(e) => return Ok(with_request_id(error_response(&e), &request_id)),
            }
        } else {
            Bytes::new()
        };

        let response = server
            .route(&parts.method, parts.uri.path(), &parts.headers, body)
            .await;
        Ok(with_request_id(response, &request_id))
    }

    /// Route a request with its body already read
    pub async fn route(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response<Full<Bytes>> {
        let result = match (method, path) {
            (&Method::GET, "/admin/modules") => self.modules_page(headers).await,
            (&Method::GET, "/admin/modules.json") => self.modules_json(headers).await,
            (&Method::POST, "/admin/action") => self.action(headers, &body).await,
            _ => Err(AdminError::NotFound(format!("{} {}", method, path))),
        };
        match result {
            Ok(response) => response,
            Err(e) => {
                if e.status().is_server_error() {
                    error!("Admin request {} {} failed: {}", method, path, e);
                } else {
                    debug!("Admin request {} {} rejected: {}", method, path, e);
                }
                error_response(&e)
            }
        }
    }

    async fn modules_page(&self, headers: &HeaderMap) -> Result<Response<Full<Bytes>>, AdminError> {
        let user = self.auth.authorize(headers, Capability::ManageModules)?;
        let listing = self.manager.lock().await.list_modules().await?;
        let nonce = self.nonces.create("toggle_module", &user.name);
        Ok(response(
            StatusCode::OK,
            HTML,
            render_modules_page(&listing, &nonce),
        ))
    }

    async fn modules_json(&self, headers: &HeaderMap) -> Result<Response<Full<Bytes>>, AdminError> {
        self.auth.authorize(headers, Capability::ManageModules)?;
        let listing = self.manager.lock().await.list_modules().await?;
        json_response(StatusCode::OK, &ModuleListResponse::from(&listing))
    }

    async fn action(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Response<Full<Bytes>>, AdminError> {
        let user = self.auth.authorize(headers, Capability::ManageModules)?;
        let request = ActionRequest::parse(body)?;
        let outcome = actions::dispatch(&self.manager, &self.nonces, &user, request).await?;
        json_response(StatusCode::OK, &outcome)
    }
}

async fn read_body(headers: &HeaderMap, body: Incoming) -> Result<Bytes, AdminError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > MAX_REQUEST_SIZE) {
        return Err(AdminError::PayloadTooLarge(MAX_REQUEST_SIZE));
    }

    match Limited::new(body, MAX_REQUEST_SIZE).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(AdminError::PayloadTooLarge(MAX_REQUEST_SIZE)),
        Err(e) => {
            warn!("Failed to read admin request body: {}", e);
            Err(AdminError::BadRequest(e.to_string()))
        }
    }
}

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response<T: serde::Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<Full<Bytes>>, AdminError> {
    let body = serde_json::to_vec(value).map_err(|e| AdminError::Internal(e.to_string()))?;
    Ok(response(status, JSON, body))
}

fn error_response(error: &AdminError) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&ActionResponse::failed(error.to_string()))
        .unwrap_or_else(|_| b"{\"success\":false}".to_vec());
    let mut response = response(error.status(), JSON, body);
    if *error == AdminError::Unauthenticated {
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    response
}

fn with_request_id(mut response: Response<Full<Bytes>>, request_id: &str) -> Response<Full<Bytes>> {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
