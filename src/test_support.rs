//! In-process HTTP server serving canned responses, for tests.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// A canned response for one request path.
#[derive(Clone, Debug)]
pub struct Canned {
    pub status: u16,
    pub body: String,
}

impl Canned {
    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
        }
    }

    pub fn json(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

/// A request as seen by the server.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone)]
struct Routes {
    canned: Arc<HashMap<String, Canned>>,
    log: Arc<Mutex<Vec<Recorded>>>,
}

pub struct TestServer {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<Recorded>>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn answer(
    State(routes): State<Routes>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    routes.log.lock().unwrap().push(Recorded {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    let canned = routes
        .canned
        .get(uri.path())
        .cloned()
        .unwrap_or(Canned::status(404));
    let status = StatusCode::from_u16(canned.status).unwrap();
    (
        status,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        canned.body,
    )
        .into_response()
}

/// Bind an ephemeral port and answer each request from `routes` by path.
/// Unknown paths get a 404.
pub async fn serve(routes: Vec<(&str, Canned)>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = Routes {
        canned: Arc::new(
            routes
                .into_iter()
                .map(|(path, canned)| (path.to_string(), canned))
                .collect(),
        ),
        log: Arc::clone(&requests),
    };
    let app = Router::new().fallback(answer).with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        requests,
    }
}
