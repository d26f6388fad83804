//! HTTP front end serving the cached status
//!
//! Routes:
//! - `GET /` renders the HTML index
//! - `GET /discord-embed` returns the chat-embed payload
//! - `GET /api/status` returns the aggregated status as JSON
//! - `GET /health` liveness probe

use crate::cache::StatusCache;
use crate::render::{build_embed, render_index, render_unavailable, EmbedConfig};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

const HTML: &str = "text/html; charset=utf-8";
const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

/// Everything a request handler needs
#[derive(Clone)]
pub struct AppState {
    pub cache: StatusCache,
    pub embed: EmbedConfig,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn respond(
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

fn respond_json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, JSON, body),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            respond(StatusCode::INTERNAL_SERVER_ERROR, TEXT, "Internal Server Error")
        }
    }
}

fn unavailable_json(err: &crate::error::StatusError) -> Response<Full<Bytes>> {
    respond_json(
        StatusCode::SERVICE_UNAVAILABLE,
        &ErrorBody {
            error: format!("status temporarily unavailable: {}", err),
        },
    )
}

/// Dispatches one request. Status failures become 503s, never panics.
pub async fn route(state: &AppState, method: &Method, path: &str) -> Response<Full<Bytes>> {
    if *method != Method::GET {
        return respond(StatusCode::METHOD_NOT_ALLOWED, TEXT, "Method Not Allowed");
    }

    match path {
        "/" => match state.cache.get_status().await {
            Ok(status) => respond(StatusCode::OK, HTML, render_index(&status, &state.embed.title)),
            Err(e) => {
                warn!("Serving unavailable page: {}", e);
                let last_known = state.cache.peek();
                respond(
                    StatusCode::SERVICE_UNAVAILABLE,
                    HTML,
                    render_unavailable(&state.embed.title, last_known.as_ref()),
                )
            }
        },
        "/discord-embed" => match state.cache.get_status().await {
            Ok(status) => respond_json(StatusCode::OK, &build_embed(&status, &state.embed)),
            Err(e) => unavailable_json(&e),
        },
        "/api/status" => match state.cache.get_status().await {
            Ok(status) => respond_json(StatusCode::OK, &status),
            Err(e) => unavailable_json(&e),
        },
        "/health" | "/healthz" => respond(StatusCode::OK, TEXT, "OK"),
        _ => respond(StatusCode::NOT_FOUND, TEXT, "Not Found"),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: AppState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    debug!("{} {}", req.method(), req.uri().path());
    Ok(route(&state, req.method(), req.uri().path()).await)
}

/// Accepts connections on `listener` until the task is dropped
pub async fn serve(listener: TcpListener, state: AppState) -> io::Result<()> {
    info!("HTTP server listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Connection from {} ended with error: {}", peer, e);
            }
        });
    }
}

pub async fn run(addr: SocketAddr, state: AppState) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}
