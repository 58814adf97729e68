//! Webhook HTTP surface.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use hyper::body::{Bytes, HttpBody};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{header, Body, Method, Request, Response, Server, StatusCode};
use sigrun_core::{AdmissionController, AdmissionReview};
use tracing::{debug, info, warn};

pub const VALIDATE_PATH: &str = "/validate";
pub const HEALTH_PATH: &str = "/healthz";

/// Largest admission review body accepted, in bytes.
pub const MAX_BODY_BYTES: u64 = 3 * 1024 * 1024;

/// Serve the webhook on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    controller: AdmissionController,
    shutdown: impl Future<Output = ()>,
) -> hyper::Result<()> {
    let make_service = make_service_fn(move |conn: &AddrStream| {
        let controller = controller.clone();
        let remote = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let controller = controller.clone();
                async move {
                    debug!(%remote, method = %req.method(), path = req.uri().path(), "request");
                    Ok::<_, Infallible>(route(&controller, req).await)
                }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_service);
    info!(%addr, "sigrun admission webhook listening");
    server.with_graceful_shutdown(shutdown).await
}

/// Dispatch one request.
pub async fn route(controller: &AdmissionController, req: Request<Body>) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, VALIDATE_PATH) => validate(controller, req).await,
        (&Method::GET, HEALTH_PATH) => text(StatusCode::OK, "ok"),
        (_, VALIDATE_PATH) | (_, HEALTH_PATH) => {
            text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
        }
        _ => text(StatusCode::NOT_FOUND, "URL NOT FOUND"),
    }
}

async fn validate(controller: &AdmissionController, req: Request<Body>) -> Response<Body> {
    let body = match read_limited(req.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(BodyError::TooLarge) => {
            warn!(limit = MAX_BODY_BYTES, "admission request body too large");
            return text(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
        Err(BodyError::Read(e)) => {
            warn!(error = %e, "failed to read admission request body");
            return text(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            warn!(error = %e, "malformed admission review");
            return text(
                StatusCode::BAD_REQUEST,
                &format!("malformed admission review: {}", e),
            );
        }
    };

    let answer = controller.review(review).await;
    match serde_json::to_vec(&answer) {
        Ok(json) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json))
            .unwrap_or_else(|_| internal_error()),
        Err(e) => {
            warn!(error = %e, "failed to encode admission response");
            internal_error()
        }
    }
}

enum BodyError {
    TooLarge,
    Read(hyper::Error),
}

/// Collect `body`, giving up as soon as it declares or streams more than `limit` bytes.
async fn read_limited(mut body: Body, limit: u64) -> Result<Bytes, BodyError> {
    if body.size_hint().lower() > limit {
        return Err(BodyError::TooLarge);
    }

    let mut collected = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(BodyError::Read)?;
        if (collected.len() + chunk.len()) as u64 > limit {
            return Err(BodyError::TooLarge);
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(collected))
}

fn text(status: StatusCode, body: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
}

fn internal_error() -> Response<Body> {
    text(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}
