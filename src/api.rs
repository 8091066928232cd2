//! Admin API for managing sites
//!
//! | Method | Path | Result |
//! |---|---|---|
//! | POST | `/v1/sites` | `{}` or `{"error": msg}` |
//! | GET | `/v1/sites` | `{"static_dirs": {id: site}, "wild_card": host}` |
//! | DELETE | `/v1/sites/{id}` | `{}` |
//! | DELETE | `/v1/sites/{id}/{delete_password}` | `{}` or `{"error": msg}` |

use crate::error::{json_error_response, site_error_response};
use crate::files::mime;
use crate::registry::Registry;
use crate::router::{full, HttpResponse};
use crate::site::SiteSpec;
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes};
use hyper::header::{ALLOW, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use tracing::{debug, info, warn};

const SITES_PATH: &str = "/v1/sites";

/// Maximum accepted request body for a site definition
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Route an API request
pub async fn handle<B>(req: Request<B>, registry: &Registry) -> HttpResponse
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let path = req.uri().path().trim_end_matches('/').to_string();
    let method = req.method().clone();

    debug!(%method, %path, "API request");

    if path == SITES_PATH {
        return match method {
            Method::POST => add_site(req, registry).await,
            Method::GET => list_sites(registry),
            _ => method_not_allowed("GET, POST"),
        };
    }

    if let Some(rest) = path.strip_prefix(SITES_PATH).and_then(|p| p.strip_prefix('/')) {
        let segments: Vec<&str> = rest.split('/').collect();
        let (id, password) = match segments.as_slice() {
            [id] => (*id, ""),
            [id, password] => (*id, *password),
            _ => return json_error_response(StatusCode::NOT_FOUND, "Not found"),
        };
        if method != Method::DELETE {
            return method_not_allowed("DELETE");
        }
        let (Ok(id), Ok(password)) = (urlencoding::decode(id), urlencoding::decode(password))
        else {
            return json_error_response(StatusCode::BAD_REQUEST, "Invalid path encoding");
        };
        return delete_site(registry, &id, &password).await;
    }

    json_error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn add_site<B>(req: Request<B>, registry: &Registry) -> HttpResponse
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = match http_body_util::Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return json_error_response(
                StatusCode::BAD_REQUEST,
                format!("Unable to read request body: {e}"),
            )
        }
    };

    let spec: SiteSpec = match serde_json::from_slice(&body) {
        Ok(spec) => spec,
        Err(e) => return json_error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match registry.add_site(spec, true, true).await {
        Ok(site) => {
            info!(id = %site.id(), hostnames = ?site.hostnames(), "Site added");
            empty_object()
        }
        Err(e) => {
            warn!(error = %e, "Failed to add site");
            site_error_response(&e)
        }
    }
}

fn list_sites(registry: &Registry) -> HttpResponse {
    match serde_json::to_vec(&registry.list()) {
        Ok(body) => json(StatusCode::OK, body),
        Err(e) => json_error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn delete_site(registry: &Registry, id: &str, password: &str) -> HttpResponse {
    match registry.delete_site(id, password, true).await {
        Ok(()) => empty_object(),
        Err(e) => {
            warn!(id, error = %e, "Failed to delete site");
            site_error_response(&e)
        }
    }
}

fn empty_object() -> HttpResponse {
    json(StatusCode::OK, "{}")
}

fn json(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, mime::JSON)
        .body(full(body))
        .expect("valid response with StatusCode enum and static header")
}

fn method_not_allowed(allow: &'static str) -> HttpResponse {
    let mut response = json_error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    response
        .headers_mut()
        .insert(ALLOW, hyper::header::HeaderValue::from_static(allow));
    response
}
