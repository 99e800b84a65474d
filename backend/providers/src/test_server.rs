//! Local HTTP stand-in for provider endpoints.

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::Router;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub authorization: Option<String>,
    pub referer: Option<String>,
    pub title: Option<String>,
    pub body: Value,
}

#[derive(Clone, Default)]
pub struct Recorded(Arc<Mutex<Vec<Seen>>>);

impl Recorded {
    pub fn last(&self) -> Option<Seen> {
        self.0.lock().unwrap().last().cloned()
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Serve `body` with `status` for every request and return the base URL.
pub async fn spawn(recorded: Recorded, status: u16, body: String, content_type: &'static str) -> String {
    let app = Router::new().fallback(move |uri: Uri, headers: HeaderMap, bytes: Bytes| {
        let recorded = recorded.clone();
        let body = body.clone();
        async move {
            recorded.0.lock().unwrap().push(Seen {
                path: uri.path().to_string(),
                authorization: header_value(&headers, "authorization"),
                referer: header_value(&headers, "http-referer"),
                title: header_value(&headers, "x-title"),
                body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
            });
            (
                StatusCode::from_u16(status).unwrap(),
                [(header::CONTENT_TYPE, content_type)],
                body,
            )
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
