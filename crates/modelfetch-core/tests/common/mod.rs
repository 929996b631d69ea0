//! In-process hub fixture for integration tests.
//!
//! Serves `/:org/:name/resolve/:revision/*filename` from an in-memory table of
//! per-file plans and records every request it sees.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the fixture answers requests for one file.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Serve the bytes, honouring `Range` when `ranges` is set.
    Serve { data: Vec<u8>, ranges: bool },
    /// Answer with a bare status code.
    Status { code: u16, retry_after: Option<u64> },
    /// Announce the full length but drop the connection after `cut_at` bytes.
    Truncate { data: Vec<u8>, cut_at: usize },
    /// Serve the bytes in `chunk`-sized pieces with `delay` before each one.
    Slow {
        data: Vec<u8>,
        chunk: usize,
        delay: Duration,
    },
    /// Answer `code` for the first `failures` requests, then serve normally.
    FailFirst {
        failures: usize,
        code: u16,
        data: Vec<u8>,
    },
}

/// One request as seen by the fixture.
#[derive(Debug, Clone)]
pub struct Seen {
    pub repo: String,
    pub filename: String,
    pub range: Option<String>,
}

#[derive(Default)]
struct FixtureState {
    plans: Mutex<HashMap<String, Plan>>,
    seen: Mutex<Vec<Seen>>,
}

pub struct TestHub {
    pub base_url: String,
    state: Arc<FixtureState>,
}

impl TestHub {
    pub async fn start() -> Self {
        let state = Arc::new(FixtureState::default());
        let app = Router::new()
            .route("/:org/:name/resolve/:revision/*filename", get(serve_file))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn set(&self, filename: &str, plan: Plan) {
        self.state
            .plans
            .lock()
            .unwrap()
            .insert(filename.to_string(), plan);
    }

    pub fn serve(&self, filename: &str, data: Vec<u8>) {
        self.set(filename, Plan::Serve { data, ranges: true });
    }

    /// Serve `data` in 16 KiB pieces, `delay` apart.
    pub fn serve_slowly(&self, filename: &str, data: Vec<u8>, delay: Duration) {
        self.set(
            filename,
            Plan::Slow {
                data,
                chunk: 16 * 1024,
                delay,
            },
        );
    }

    /// Direct download URL for a file of `org/model`.
    pub fn url(&self, filename: &str) -> String {
        format!("{}/org/model/resolve/main/{}", self.base_url, filename)
    }

    pub fn requests(&self) -> Vec<Seen> {
        self.state.seen.lock().unwrap().clone()
    }

    pub fn requests_for(&self, filename: &str) -> Vec<Seen> {
        self.requests()
            .into_iter()
            .filter(|s| s.filename == filename)
            .collect()
    }
}

/// Deterministic, non-repeating-looking payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

async fn serve_file(
    State(state): State<Arc<FixtureState>>,
    Path((org, name, _revision, filename)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let prior = {
        let mut seen = state.seen.lock().unwrap();
        let prior = seen.iter().filter(|s| s.filename == filename).count();
        seen.push(Seen {
            repo: format!("{}/{}", org, name),
            filename: filename.clone(),
            range: range.clone(),
        });
        prior
    };

    let plan = state.plans.lock().unwrap().get(&filename).cloned();
    match plan {
        None => StatusCode::NOT_FOUND.into_response(),
        Some(Plan::Serve { data, ranges }) => serve_bytes(data, range.filter(|_| ranges)),
        Some(Plan::Status { code, retry_after }) => {
            let status = StatusCode::from_u16(code).unwrap();
            match retry_after {
                Some(secs) => (status, [(header::RETRY_AFTER, secs.to_string())]).into_response(),
                None => status.into_response(),
            }
        }
        Some(Plan::Truncate { data, cut_at }) => {
            let total = data.len();
            let head = Bytes::from(data[..cut_at].to_vec());
            let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
                Ok(head),
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "fixture cut the stream",
                )),
            ];
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, total)
                .body(Body::from_stream(futures::stream::iter(chunks)))
                .unwrap()
        }
        Some(Plan::Slow { data, chunk, delay }) => {
            let total = data.len();
            let pieces: Vec<Bytes> = data.chunks(chunk).map(Bytes::copy_from_slice).collect();
            let stream = futures::stream::iter(pieces).then(move |piece| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, std::io::Error>(piece)
            });
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, total)
                .body(Body::from_stream(stream))
                .unwrap()
        }
        Some(Plan::FailFirst {
            failures,
            code,
            data,
        }) => {
            if prior < failures {
                StatusCode::from_u16(code).unwrap().into_response()
            } else {
                serve_bytes(data, range)
            }
        }
    }
}

fn serve_bytes(data: Vec<u8>, range: Option<String>) -> Response {
    let total = data.len();
    let start = range
        .as_deref()
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.strip_suffix('-'))
        .and_then(|s| s.parse::<usize>().ok());

    match start {
        None => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, total)
            .body(Body::from(data))
            .unwrap(),
        Some(start) if start >= total => Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{}", total))
            .body(Body::empty())
            .unwrap(),
        Some(start) => Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, total - 1, total),
            )
            .header(header::CONTENT_LENGTH, total - start)
            .body(Body::from(data[start..].to_vec()))
            .unwrap(),
    }
}
