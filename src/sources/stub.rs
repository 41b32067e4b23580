//! Local HTTP stand-in for the activity APIs, used by client tests.

use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use std::sync::{Arc, Mutex};

/// Maps a request (URI, body) to a status and JSON body.
type Responder = dyn Fn(&Uri, &str) -> (StatusCode, String) + Send + Sync;

#[derive(Clone)]
struct StubState {
    responder: Arc<Responder>,
    requests: Arc<Mutex<Vec<String>>>,
}

/// A server on an ephemeral local port answering every route through one
/// closure and recording each request's path and query.
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Uri, &str) -> (StatusCode, String) + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            responder: Arc::new(responder),
            requests: requests.clone(),
        };
        let app = Router::new().fallback(answer).with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    /// Path and query of every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn answer(State(state): State<StubState>, uri: Uri, body: String) -> impl IntoResponse {
    state.requests.lock().unwrap().push(uri.to_string());
    let (status, json) = (state.responder)(&uri, &body);
    (status, [(header::CONTENT_TYPE, "application/json")], json)
}

/// Whether the query string carries exactly `pair` (`key=value`).
pub fn has_param(uri: &Uri, pair: &str) -> bool {
    uri.query()
        .map(|q| q.split('&').any(|p| p == pair))
        .unwrap_or(false)
}
