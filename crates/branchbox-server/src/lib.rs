//! JSON-over-HTTP surface for the Branchbox lifecycle engine.
//!
//! Routes:
//! - `POST /provision` `{branch, service?, ttl_minutes?}` → receipt
//! - `POST /destroy`   `{env_id}` → `{"ok": true}`
//! - `GET  /list`      → `{"environments": [...]}`
//! - `POST /gc`        → `{"garbage_collected": [...], "failed": [...]}`
//! - `GET  /health`    → `{"status":"ok"}`
//!
//! Requests are served from a small worker pool so independent provisions
//! proceed in parallel; the engine's store provides the ordering guarantees.
//!
//! The [`TestServer`] helper starts a server on a random port for
//! integration testing.

use branchbox_core::{CoreError, Engine, ErrorKind};
use serde::Deserialize;
use std::io::Read;
use std::sync::Arc;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, error, info};

/// Handler threads per server. Provisions block on builds and tunnel
/// polling, so a few workers go a long way.
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Deserialize)]
struct ProvisionReq {
    branch: String,
    #[serde(default = "default_service")]
    service: String,
    #[serde(default)]
    ttl_minutes: Option<i64>,
}

fn default_service() -> String {
    "web".to_owned()
}

#[derive(Debug, Deserialize)]
struct DestroyReq {
    env_id: String,
}

fn http_status(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::InvalidInput => 400,
        ErrorKind::NotFound => 404,
        ErrorKind::Conflict => 409,
        ErrorKind::TunnelUnavailable => 502,
        ErrorKind::CommandFailed | ErrorKind::RollbackFailed | ErrorKind::Internal => 500,
    }
}

fn respond_json(req: tiny_http::Request, json: String) {
    let header = Header::from_bytes("Content-Type", "application/json").expect("valid header");
    let _ = req.respond(Response::from_string(json).with_header(header));
}

fn respond_error(req: tiny_http::Request, err: &CoreError) {
    let kind = err.kind();
    let body = serde_json::json!({
        "error": err.to_string(),
        "kind": kind.to_string(),
    });
    let header = Header::from_bytes("Content-Type", "application/json").expect("valid header");
    let _ = req.respond(
        Response::from_string(body.to_string())
            .with_header(header)
            .with_status_code(StatusCode(http_status(kind))),
    );
}

fn respond_plain_err(req: tiny_http::Request, code: u16, msg: &str) {
    let body = serde_json::json!({ "error": msg });
    let header = Header::from_bytes("Content-Type", "application/json").expect("valid header");
    let _ = req.respond(
        Response::from_string(body.to_string())
            .with_header(header)
            .with_status_code(StatusCode(code)),
    );
}

fn read_body(req: &mut tiny_http::Request) -> Option<String> {
    let mut body = String::new();
    if req.as_reader().read_to_string(&mut body).is_ok() {
        Some(body)
    } else {
        None
    }
}

fn handle_provision(engine: &Engine, mut req: tiny_http::Request) {
    let Some(body) = read_body(&mut req) else {
        respond_plain_err(req, 500, "read error");
        return;
    };
    let parsed: ProvisionReq = match serde_json::from_str(&body) {
        Ok(p) => p,
        Err(e) => {
            respond_plain_err(req, 400, &format!("invalid request body: {e}"));
            return;
        }
    };

    match engine.provision(&parsed.branch, &parsed.service, parsed.ttl_minutes) {
        Ok(receipt) => match serde_json::to_string(&receipt) {
            Ok(json) => respond_json(req, json),
            Err(e) => respond_plain_err(req, 500, &format!("serialization error: {e}")),
        },
        Err(e) => {
            error!("provision of '{}' failed: {e}", parsed.branch);
            respond_error(req, &e);
        }
    }
}

fn handle_destroy(engine: &Engine, mut req: tiny_http::Request) {
    let Some(body) = read_body(&mut req) else {
        respond_plain_err(req, 500, "read error");
        return;
    };
    let parsed: DestroyReq = match serde_json::from_str(&body) {
        Ok(p) => p,
        Err(e) => {
            respond_plain_err(req, 400, &format!("invalid request body: {e}"));
            return;
        }
    };

    match engine.destroy(&parsed.env_id) {
        Ok(()) => respond_json(req, r#"{"ok":true}"#.to_owned()),
        Err(e) => {
            error!("destroy of '{}' failed: {e}", parsed.env_id);
            respond_error(req, &e);
        }
    }
}

fn handle_list(engine: &Engine, req: tiny_http::Request) {
    match engine.list() {
        Ok(envs) => {
            let body = serde_json::json!({ "environments": envs });
            respond_json(req, body.to_string());
        }
        Err(e) => respond_error(req, &e),
    }
}

fn handle_gc(engine: &Engine, req: tiny_http::Request) {
    match engine.garbage_collect() {
        Ok(report) => {
            let body = serde_json::json!({
                "garbage_collected": report.destroyed,
                "failed": report.failed,
            });
            respond_json(req, body.to_string());
        }
        Err(e) => respond_error(req, &e),
    }
}

/// Handle a single HTTP request, dispatching to the matching route handler.
pub fn handle_request(engine: &Engine, req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    match (method, url.as_str()) {
        (Method::Post, "/provision") => handle_provision(engine, req),
        (Method::Post, "/destroy") => handle_destroy(engine, req),
        (Method::Get, "/list") => handle_list(engine, req),
        (Method::Post, "/gc") => handle_gc(engine, req),
        (Method::Get, "/health") => {
            respond_json(req, r#"{"status":"ok"}"#.to_owned());
        }
        _ => respond_plain_err(req, 404, "not found"),
    }
}

/// Start the server loop, blocking the current thread until the listener
/// is unblocked. Requests are handled by `workers` threads sharing the
/// accept queue.
pub fn run_server(engine: &Arc<Engine>, addr: &str, workers: usize) {
    let server = Arc::new(Server::http(addr).expect("failed to bind HTTP server"));
    serve(engine, &server, workers.max(1));
}

fn serve(engine: &Arc<Engine>, server: &Arc<Server>, workers: usize) {
    let mut handles = Vec::new();
    for _ in 0..workers {
        let engine = Arc::clone(engine);
        let server = Arc::clone(server);
        handles.push(std::thread::spawn(move || {
            for request in server.incoming_requests() {
                handle_request(&engine, request);
            }
        }));
    }
    for handle in handles {
        let _ = handle.join();
    }
}

/// A test helper that starts a server on a random port in background
/// threads.
///
/// Drop the `TestServer` to stop it (via `Server::unblock`).
pub struct TestServer {
    pub url: String,
    pub port: u16,
    server: Arc<Server>,
    _handles: Vec<std::thread::JoinHandle<()>>,
}

impl TestServer {
    /// Start a test server around an already-configured engine.
    /// Binds to `127.0.0.1:0` (random port).
    pub fn start(engine: Engine) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");
        info!("test server on {url}");

        let engine = Arc::new(engine);
        let mut handles = Vec::new();
        for _ in 0..DEFAULT_WORKERS {
            let engine = Arc::clone(&engine);
            let srv = Arc::clone(&server);
            handles.push(std::thread::spawn(move || {
                for request in srv.incoming_requests() {
                    handle_request(&engine, request);
                }
            }));
        }

        Self {
            url,
            port,
            server,
            _handles: handles,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
