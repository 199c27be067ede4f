//! Admin surface tests
//!
//! Requests are routed in-process; one test goes through a real socket.

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{HeaderMap, Method, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use module_gate::admin::{
    ActionResponse, AdminAuthManager, AdminServer, ModuleListResponse, NonceManager,
};
use module_gate::config::AdminRole;
use module_gate::module::ModuleState;

use super::test_utils::*;

const ADMIN_TOKEN: &str = "admin-token-for-tests";
const VIEWER_TOKEN: &str = "viewer-token-for-tests";

struct AdminFixture {
    modules: ModuleTestFixture,
    server: Arc<AdminServer>,
}

impl AdminFixture {
    fn new() -> Self {
        let modules = ModuleTestFixture::new();
        let manager = Arc::new(Mutex::new(modules.manager()));

        let mut auth = AdminAuthManager::new();
        auth.add_user(ADMIN_TOKEN.into(), "root".into(), AdminRole::Administrator);
        auth.add_user(VIEWER_TOKEN.into(), "guest".into(), AdminRole::Viewer);

        let server = Arc::new(AdminServer::new(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            manager,
            Arc::new(auth),
            Arc::new(NonceManager::new(b"admin-test-secret".to_vec(), 86_400)),
        ));
        Self { modules, server }
    }

    fn nonce(&self, action: &str, user: &str) -> String {
        self.server.nonces().create(action, user)
    }

    async fn get(&self, path: &str, token: Option<&str>) -> (StatusCode, String) {
        let resp = self
            .server
            .route(&Method::GET, path, &headers(token), Bytes::new())
            .await;
        read(resp).await
    }

    async fn post(&self, token: Option<&str>, body: serde_json::Value) -> (StatusCode, String) {
        let resp = self
            .server
            .route(
                &Method::POST,
                "/admin/action",
                &headers(token),
                Bytes::from(body.to_string()),
            )
            .await;
        read(resp).await
    }

    async fn toggle(&self, module_id: &str, status: &str) -> (StatusCode, ActionResponse) {
        let body = serde_json::json!({
            "action": "toggle_module",
            "module_id": module_id,
            "status": status,
            "nonce": self.nonce("toggle_module", "root"),
        });
        let (status, text) = self.post(Some(ADMIN_TOKEN), body).await;
        (status, serde_json::from_str(&text).unwrap())
    }
}

fn headers(token: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(token) = token {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
    }
    headers
}

async fn read(resp: Response<http_body_util::Full<Bytes>>) -> (StatusCode, String) {
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_page_requires_authentication() {
    let fixture = AdminFixture::new();
    let (status, _) = fixture.get("/admin/modules", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = fixture.get("/admin/modules", Some("wrong-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_page_requires_capability() {
    let fixture = AdminFixture::new();
    let (status, body) = fixture.get("/admin/modules", Some(VIEWER_TOKEN)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let parsed: ActionResponse = serde_json::from_str(&body).unwrap();
    assert!(!parsed.success);
}

#[tokio::test]
async fn test_page_lists_modules_with_nonce() {
    let fixture = AdminFixture::new();
    fixture
        .modules
        .write_module("alpha.sh", "Alpha <Beta>", CLEAN);

    let (status, html) = fixture.get("/admin/modules", Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("Alpha &lt;Beta&gt;"));
    assert!(html.contains("data-module=\"gate_alpha__beta_\""));
    let nonce = fixture.nonce("toggle_module", "root");
    assert!(html.contains(&format!("data-nonce=\"{}\"", nonce)));

    // Viewing the page registers the module as off
    assert_eq!(
        fixture
            .modules
            .registry
            .stored_state("gate_alpha__beta_")
            .unwrap(),
        Some(ModuleState::Off)
    );
}

#[tokio::test]
async fn test_json_listing() {
    let fixture = AdminFixture::new();
    fixture.modules.write_module("a.sh", "Alpha", CLEAN);
    fixture.modules.write_module("b.sh", "ALPHA", CLEAN);
    fixture.modules.write_module("c.sh", "Gamma", CLEAN);
    fixture
        .modules
        .registry
        .set_state("gate_gamma", ModuleState::On)
        .unwrap();

    let (status, body) = fixture.get("/admin/modules.json", Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    let listing: ModuleListResponse = serde_json::from_str(&body).unwrap();

    assert_eq!(listing.modules.len(), 2);
    assert_eq!(listing.modules[0].identifier, "gate_alpha");
    assert_eq!(listing.modules[0].state, ModuleState::Off);
    assert_eq!(listing.modules[1].identifier, "gate_gamma");
    assert_eq!(listing.modules[1].state, ModuleState::On);
    assert_eq!(listing.collisions.len(), 1);
    assert_eq!(listing.collisions[0].display_name, "ALPHA");
}

#[tokio::test]
async fn test_toggle_on_and_off() {
    let fixture = AdminFixture::new();
    fixture.modules.write_module("alpha.sh", "Alpha", CLEAN);

    let (status, resp) = fixture.toggle("gate_alpha", "on").await;
    assert_eq!(status, StatusCode::OK);
    assert!(resp.success, "{:?}", resp);
    assert_eq!(
        fixture.modules.registry.get_state("gate_alpha").unwrap(),
        ModuleState::On
    );

    let (status, resp) = fixture.toggle("gate_alpha", "off").await;
    assert_eq!(status, StatusCode::OK);
    assert!(resp.success);
    assert_eq!(
        fixture.modules.registry.get_state("gate_alpha").unwrap(),
        ModuleState::Off
    );
}

#[tokio::test]
async fn test_toggle_broken_module_reports_error() {
    let fixture = AdminFixture::new();
    fixture.modules.write_module("broken.sh", "Broken", BROKEN);

    let (status, resp) = fixture.toggle("gate_broken", "on").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!resp.success);
    assert_eq!(
        resp.error.as_deref(),
        Some("Fatal: call to undefined function boot()")
    );
    assert_eq!(
        fixture.modules.registry.get_state("gate_broken").unwrap(),
        ModuleState::Off
    );
}

#[tokio::test]
async fn test_toggle_unknown_module() {
    let fixture = AdminFixture::new();
    let (status, resp) = fixture.toggle("gate_nothing", "on").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!resp.success);
}

#[tokio::test]
async fn test_bad_nonce_rejected_before_registry_access() {
    let fixture = AdminFixture::new();
    fixture.modules.write_module("alpha.sh", "Alpha", RECORDS_RUNS);

    for nonce in [
        "0000000000".to_string(),
        fixture.nonce("rescan_modules", "root"),
        fixture.nonce("toggle_module", "guest"),
    ] {
        let body = serde_json::json!({
            "action": "toggle_module",
            "module_id": "gate_alpha",
            "status": "on",
            "nonce": nonce,
        });
        let (status, _) = fixture.post(Some(ADMIN_TOKEN), body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    assert!(fixture.modules.registry.entries().unwrap().is_empty());
    assert!(fixture.modules.recorded_runs("gate_alpha").is_empty());
}

#[tokio::test]
async fn test_action_auth_and_parsing() {
    let fixture = AdminFixture::new();
    let body = serde_json::json!({
        "action": "rescan_modules",
        "nonce": fixture.nonce("rescan_modules", "root"),
    });

    let (status, _) = fixture.post(None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = fixture.post(Some(VIEWER_TOKEN), body).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = fixture
        .post(
            Some(ADMIN_TOKEN),
            serde_json::json!({"action": "drop_tables", "nonce": "x"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rescan_action() {
    let fixture = AdminFixture::new();
    fixture.modules.write_module("alpha.sh", "Alpha", CLEAN);
    fixture.modules.write_module("beta.sh", "Beta", CLEAN);

    let body = serde_json::json!({
        "action": "rescan_modules",
        "nonce": fixture.nonce("rescan_modules", "root"),
    });
    let (status, text) = fixture.post(Some(ADMIN_TOKEN), body).await;
    assert_eq!(status, StatusCode::OK);
    let resp: ActionResponse = serde_json::from_str(&text).unwrap();
    assert_eq!(resp.message.as_deref(), Some("Found 2 modules"));
    assert_eq!(fixture.modules.registry.entries().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_route() {
    let fixture = AdminFixture::new();
    let (status, _) = fixture.get("/admin/other", Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        stream.read_to_end(&mut buf),
    )
    .await;
    String::from_utf8_lossy(&buf).to_string()
}

#[tokio::test]
async fn test_over_the_wire() {
    let fixture = AdminFixture::new();
    fixture.modules.write_module("alpha.sh", "Alpha", CLEAN);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = tokio::spawn(Arc::clone(&fixture.server).serve(listener));

    let resp = raw_request(
        addr,
        &format!(
            "GET /admin/modules.json HTTP/1.1\r\nHost: localhost\r\n\
             Cookie: gate_token={}\r\nConnection: close\r\n\r\n",
            ADMIN_TOKEN
        ),
    )
    .await;
    assert!(resp.starts_with("HTTP/1.1 200"), "{}", resp);
    assert!(resp.contains("x-request-id"));
    assert!(resp.contains("\"gate_alpha\""));

    let resp = raw_request(
        addr,
        "GET /admin/modules HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("HTTP/1.1 401"), "{}", resp);

    let resp = raw_request(
        addr,
        &format!(
            "POST /admin/action HTTP/1.1\r\nHost: localhost\r\n\
             Authorization: Bearer {}\r\nContent-Length: 10000000\r\n\
             Connection: close\r\n\r\n",
            ADMIN_TOKEN
        ),
    )
    .await;
    assert!(resp.starts_with("HTTP/1.1 413"), "{}", resp);

    serving.abort();
}
