//! Host-dispatch route table
//!
//! A [`RouteTable`] is built from a snapshot of the registry and never
//! mutated afterwards. The registry swaps in a freshly built table after
//! every add or delete; requests in flight keep the table they started with.

use crate::api;
use crate::assets::{self, AssetFs};
use crate::auth::{BasicAuth, StaticCredentials};
use crate::files::{self, mime};
use crate::registry::Registry;
use crate::site::Site;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_TYPE, HOST, WWW_AUTHENTICATE};
use hyper::{Request, Response, StatusCode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Path prefix of the admin API
pub const API_PREFIX: &str = "/v1/";

/// Realm used for the admin API's basic auth
pub const API_REALM: &str = "api";

pub type HttpBody = BoxBody<Bytes, hyper::Error>;
pub type HttpResponse = Response<HttpBody>;

/// Wrap bytes in a boxed body
pub fn full(content: impl Into<Bytes>) -> HttpBody {
    Full::new(content.into()).map_err(|never| match never {}).boxed()
}

/// Route for one tenant hostname
#[derive(Debug, Clone)]
pub struct HostRoute {
    pub site_id: String,
    pub dir: PathBuf,
    pub auth: Option<BasicAuth>,
}

/// Parts of the table that do not depend on the registry contents
#[derive(Clone, Default)]
pub struct RouterConfig {
    /// Gate for the admin API; open when `None`
    pub admin_auth: Option<BasicAuth>,
    /// Fallback for requests that match nothing else
    pub assets: Option<Arc<dyn AssetFs>>,
}

impl RouterConfig {
    pub fn new(admin: Option<(String, String)>, assets: Option<Arc<dyn AssetFs>>) -> Self {
        let admin_auth = admin.map(|(username, password)| {
            BasicAuth::new(
                API_REALM,
                Arc::new(StaticCredentials::new(username, &password)),
            )
        });
        Self { admin_auth, assets }
    }
}

/// Immutable host → handler dispatch table
#[derive(Clone, Default)]
pub struct RouteTable {
    hosts: HashMap<String, HostRoute>,
    config: RouterConfig,
}

impl RouteTable {
    /// Build routes for every hostname of every site
    pub fn build(sites: &[Arc<Site>], config: &RouterConfig) -> Self {
        let mut hosts = HashMap::new();
        for site in sites {
            let dir = site.serve_dir();
            let credentials = site
                .spec()
                .access_credentials()
                .map(|(username, password)| Arc::new(StaticCredentials::new(username, password)));

            for host in site.hostnames() {
                let auth = credentials
                    .clone()
                    .map(|checker| BasicAuth::new(host.clone(), checker));
                hosts.insert(
                    host.clone(),
                    HostRoute {
                        site_id: site.id().to_string(),
                        dir: dir.clone(),
                        auth,
                    },
                );
            }
        }
        Self {
            hosts,
            config: config.clone(),
        }
    }

    pub fn route(&self, host: &str) -> Option<&HostRoute> {
        self.hosts.get(host)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Dispatch a request and write one access-log line for it
    pub async fn serve<B>(
        &self,
        req: Request<B>,
        registry: &Registry,
        remote: Option<SocketAddr>,
    ) -> HttpResponse
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let host = request_host(&req).unwrap_or_default();

        let response = self.dispatch(req, registry).await;

        info!(
            remote = ?remote,
            %method,
            host = %host,
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request"
        );
        response
    }

    async fn dispatch<B>(&self, req: Request<B>, registry: &Registry) -> HttpResponse
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = req.uri().path().to_string();

        if let Some(route) = request_host(&req).and_then(|host| self.hosts.get(&host)) {
            if is_git_path(&path) {
                return files::not_found();
            }
            if let Some(auth) = &route.auth {
                if !auth.check(req.headers()) {
                    return unauthorized(auth);
                }
            }
            return files::serve(req.method(), &path, &route.dir).await;
        }

        if path.starts_with(API_PREFIX) {
            if let Some(auth) = &self.config.admin_auth {
                if !auth.check(req.headers()) {
                    return unauthorized(auth);
                }
            }
            return api::handle(req, registry).await;
        }

        match &self.config.assets {
            Some(fs) => assets::serve(Arc::clone(fs), req.method(), &path).await,
            None => files::not_found(),
        }
    }
}

/// Lower-cased request host without port, from `Host` or the URI authority
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    let raw = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))?;

    let host = if let Some(rest) = raw.strip_prefix('[') {
        // IPv6 literal
        rest.split(']').next()?
    } else {
        raw.split(':').next()?
    };
    let host = host.trim().trim_end_matches('.');
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

/// Whether a request path points into `.git` at the top of the site
fn is_git_path(path: &str) -> bool {
    let decoded = files::decode_path(path).unwrap_or_else(|| path.to_string());
    decoded
        .split('/')
        .find(|segment| !segment.is_empty() && *segment != ".")
        .is_some_and(|segment| segment.eq_ignore_ascii_case(".git"))
}

fn unauthorized(auth: &BasicAuth) -> HttpResponse {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(WWW_AUTHENTICATE, auth.challenge())
        .header(CONTENT_TYPE, mime::PLAIN)
        .body(full("401 Unauthorized\n"))
        .unwrap_or_else(|_| files::not_found())
}
