//! Integration tests for Sitehost

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sitehost::assets::EmbeddedAssets;
use sitehost::registry::{Registry, RegistryOptions};
use sitehost::server::SiteServer;
use sitehost::site::SiteSpec;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const WILDCARD: &str = "sites.test";

fn git_available() -> bool {
    StdCommand::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let output = StdCommand::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create an upstream repository with `index.html` and `docs/index.html` on master
fn create_upstream(dir: &Path) -> PathBuf {
    let work = dir.join("upstream");
    std::fs::create_dir_all(work.join("docs")).unwrap();
    git(&work, &["init", "--quiet"]);
    git(&work, &["symbolic-ref", "HEAD", "refs/heads/master"]);
    std::fs::write(work.join("index.html"), "home v1").unwrap();
    std::fs::write(work.join("docs/index.html"), "docs v1").unwrap();
    git(&work, &["add", "."]);
    git(&work, &["commit", "--quiet", "-m", "v1"]);
    work
}

fn commit(work: &Path, name: &str, content: &str) {
    std::fs::write(work.join(name), content).unwrap();
    git(work, &["add", "."]);
    git(work, &["commit", "--quiet", "-m", content]);
}

struct TestServer {
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown_tx: watch::Sender<bool>,
    _dir: TempDir,
}

impl TestServer {
    async fn start(dir: TempDir, admin: Option<(&str, &str)>) -> Self {
        let mut options = RegistryOptions::new(dir.path().join("data"), WILDCARD);
        options.admin = admin.map(|(u, p)| (u.to_string(), p.to_string()));
        options.assets = Some(Arc::new(EmbeddedAssets));
        options.sync_interval = Duration::from_secs(3600);
        let registry = Registry::new(options).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = SiteServer::new(addr, Arc::clone(&registry), shutdown_rx);
        tokio::spawn(async move {
            let _ = server.run_with_listener(listener).await;
        });

        Self {
            addr,
            registry,
            shutdown_tx,
            _dir: dir,
        }
    }

    fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.registry.shutdown();
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        host: &str,
        headers: &[(&str, String)],
        body: &str,
    ) -> Response {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();

        let mut request = format!("{method} {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n");
        for (name, value) in headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        Response::parse(&raw)
    }

    async fn get(&self, path: &str, host: &str) -> Response {
        self.request("GET", path, host, &[], "").await
    }
}

#[derive(Debug)]
struct Response {
    status: u16,
    head: String,
    body: String,
}

impl Response {
    fn parse(raw: &str) -> Self {
        let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Self {
            status,
            head: head.to_ascii_lowercase(),
            body: body.to_string(),
        }
    }

    fn has_header(&self, name: &str, value: &str) -> bool {
        let needle = format!("{}: {}", name.to_ascii_lowercase(), value.to_ascii_lowercase());
        self.head.lines().any(|line| line.starts_with(&needle))
    }
}

fn basic(user: &str, pass: &str) -> (&'static str, String) {
    ("Authorization", format!("Basic {}", STANDARD.encode(format!("{user}:{pass}"))))
}

fn site_json(name: &str, hosts: &[&str], repo: &Path) -> String {
    serde_json::json!({
        "name": name,
        "hostnames": hosts,
        "git_repo": repo.to_string_lossy(),
    })
    .to_string()
}

// ============================================================================
// Host dispatch and content
// ============================================================================

#[tokio::test]
async fn test_site_served_by_host_header() {
    if !git_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let upstream = create_upstream(dir.path());
    let server = TestServer::start(dir, None).await;

    let response = server
        .request(
            "POST",
            "/v1/sites",
            WILDCARD,
            &[],
            &site_json("Home", &["a.test", "www.a.test"], &upstream),
        )
        .await;
    assert_eq!(response.status, 200, "{response:?}");
    assert_eq!(response.body, "{}");

    let response = server.get("/", "a.test").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "home v1");

    let response = server.get("/", "WWW.A.TEST:8080").await;
    assert_eq!(response.body, "home v1");

    let response = server.get("/docs", "a.test").await;
    assert_eq!(response.status, 301);
    assert!(response.has_header("location", "./docs/"));

    let response = server.get("/docs/", "a.test").await;
    assert_eq!(response.body, "docs v1");

    let response = server.get("/missing.html", "a.test").await;
    assert_eq!(response.status, 404);

    server.stop();
}

#[tokio::test]
async fn test_content_follows_branch_after_sync() {
    if !git_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let upstream = create_upstream(dir.path());
    let server = TestServer::start(dir, None).await;

    let spec = SiteSpec {
        name: "Home".to_string(),
        hostnames: vec!["a.test".to_string()],
        git_url: upstream.to_string_lossy().into_owned(),
        ..Default::default()
    };
    let site = server.registry.add_site(spec, true, true).await.unwrap();
    assert_eq!(server.get("/", "a.test").await.body, "home v1");

    commit(&upstream, "index.html", "home v2");
    site.update().await.unwrap();
    assert_eq!(server.get("/", "a.test").await.body, "home v2");

    server.stop();
}

#[tokio::test]
async fn test_unreachable_remote_keeps_last_content() {
    if !git_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let upstream_a = create_upstream(&dir.path().join("a"));
    let upstream_b = create_upstream(&dir.path().join("b"));
    commit(&upstream_b, "index.html", "b v1");
    let moved_a = dir.path().join("a/moved");
    let server = TestServer::start(dir, None).await;

    let site = |name: &str, host: &str, upstream: &Path| SiteSpec {
        name: name.to_string(),
        hostnames: vec![host.to_string()],
        git_url: upstream.to_string_lossy().into_owned(),
        ..Default::default()
    };
    let site_a = server
        .registry
        .add_site(site("A", "a.test", &upstream_a), true, true)
        .await
        .unwrap();
    let site_b = server
        .registry
        .add_site(site("B", "b.test", &upstream_b), true, true)
        .await
        .unwrap();

    std::fs::rename(&upstream_a, &moved_a).unwrap();
    assert!(site_a.update().await.is_err());
    assert!(!site_a.is_healthy());

    let response = server.get("/", "a.test").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "home v1");

    site_b.update().await.unwrap();
    assert!(site_b.is_healthy());
    assert_eq!(server.get("/", "b.test").await.body, "b v1");

    let listing = server.registry.list();
    assert!(!listing.static_dirs[site_a.id()].healthy);
    assert!(listing.static_dirs[site_b.id()].healthy);

    server.stop();
}

#[tokio::test]
async fn test_git_directory_hidden() {
    if !git_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let upstream = create_upstream(dir.path());
    let server = TestServer::start(dir, None).await;

    let spec = SiteSpec {
        name: "Home".to_string(),
        hostnames: vec!["a.test".to_string()],
        git_url: upstream.to_string_lossy().into_owned(),
        ..Default::default()
    };
    server.registry.add_site(spec, true, true).await.unwrap();

    assert_eq!(server.get("/.git/config", "a.test").await.status, 404);
    assert_eq!(server.get("/.git/HEAD", "a.test").await.status, 404);
    assert_eq!(server.get("/%2Egit/HEAD", "a.test").await.status, 404);

    server.stop();
}

#[tokio::test]
async fn test_site_basic_auth() {
    if !git_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let upstream = create_upstream(dir.path());
    let server = TestServer::start(dir, None).await;

    let spec = SiteSpec {
        name: "Private".to_string(),
        hostnames: vec!["private.test".to_string()],
        git_url: upstream.to_string_lossy().into_owned(),
        access_username: "reader".to_string(),
        access_password: "hunter22".to_string(),
        ..Default::default()
    };
    server.registry.add_site(spec, true, true).await.unwrap();

    let response = server.get("/", "private.test").await;
    assert_eq!(response.status, 401);
    assert!(response.has_header("www-authenticate", "Basic realm=\"private.test\""));

    let response = server
        .request("GET", "/", "private.test", &[basic("reader", "wrong")], "")
        .await;
    assert_eq!(response.status, 401);

    let response = server
        .request("GET", "/", "private.test", &[basic("reader", "hunter22")], "")
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "home v1");

    server.stop();
}

#[tokio::test]
async fn test_unknown_host_gets_admin_ui() {
    let server = TestServer::start(TempDir::new().unwrap(), None).await;

    let response = server.get("/", WILDCARD).await;
    assert_eq!(response.status, 200);
    assert!(response.body.contains("<title>Sites</title>"));

    let response = server.get("/app.js", "unknown.test").await;
    assert_eq!(response.status, 200);
    assert!(response.has_header("content-type", "text/javascript"));

    assert_eq!(server.get("/nope.png", WILDCARD).await.status, 404);

    server.stop();
}

// ============================================================================
// Admin API
// ============================================================================

#[tokio::test]
async fn test_api_validation_errors() {
    let server = TestServer::start(TempDir::new().unwrap(), None).await;

    let response = server
        .request("POST", "/v1/sites", WILDCARD, &[], r#"{"hostnames": ["a.test"]}"#)
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body, r#"{"error":"Please provide a name."}"#);

    let response = server
        .request(
            "POST",
            "/v1/sites",
            WILDCARD,
            &[],
            r#"{"name": "a", "hostnames": ["a.test"], "access_username": "u"}"#,
        )
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(
        response.body,
        r#"{"error":"Both username and password must be provided."}"#
    );

    let response = server
        .request(
            "POST",
            "/v1/sites",
            WILDCARD,
            &[],
            &format!(r#"{{"name": "a", "hostnames": ["{WILDCARD}"]}}"#),
        )
        .await;
    assert_eq!(response.status, 400);
    assert!(response.body.contains("Cannot use hostname sites.test"));

    let response = server
        .request("POST", "/v1/sites", WILDCARD, &[], "{not json")
        .await;
    assert_eq!(response.status, 400);
    assert!(response.body.starts_with(r#"{"error":"#));

    assert!(server.registry.is_empty());
    server.stop();
}

#[tokio::test]
async fn test_api_clone_failure() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing-repo");
    let server = TestServer::start(dir, None).await;

    let response = server
        .request(
            "POST",
            "/v1/sites",
            WILDCARD,
            &[],
            &site_json("Broken", &["broken.test"], &missing),
        )
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body, r#"{"error":"Unable to clone repo."}"#);
    assert!(server.registry.is_empty());

    server.stop();
}

#[tokio::test]
async fn test_api_list_and_delete() {
    let server = TestServer::start(TempDir::new().unwrap(), None).await;

    let spec = SiteSpec {
        name: "Guarded".to_string(),
        hostnames: vec!["guarded.test".to_string()],
        git_url: "https://example.com/guarded.git".to_string(),
        delete_password: "letmein".to_string(),
        ..Default::default()
    };
    let site = server.registry.add_site(spec, false, true).await.unwrap();

    let response = server.get("/v1/sites", WILDCARD).await;
    assert_eq!(response.status, 200);
    let listing: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(listing["wild_card"], WILDCARD);
    let entry = &listing["static_dirs"][site.id()];
    assert_eq!(entry["name"], "Guarded");
    assert_eq!(entry["has_delete_password"], true);
    assert_eq!(entry["healthy"], false);
    assert!(!response.body.contains("letmein"));

    let response = server
        .request("DELETE", &format!("/v1/sites/{}/wrong", site.id()), WILDCARD, &[], "")
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body, r#"{"error":"Password does not match."}"#);
    assert_eq!(server.registry.len(), 1);

    let response = server
        .request("DELETE", &format!("/v1/sites/{}/letmein", site.id()), WILDCARD, &[], "")
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "{}");
    assert!(server.registry.is_empty());

    // deleting again is not an error
    let response = server
        .request("DELETE", &format!("/v1/sites/{}", site.id()), WILDCARD, &[], "")
        .await;
    assert_eq!(response.status, 200);

    let response = server.get("/v1/sites", WILDCARD).await;
    let listing: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(listing["static_dirs"], serde_json::json!({}));

    server.stop();
}

#[tokio::test]
async fn test_api_unknown_route() {
    let server = TestServer::start(TempDir::new().unwrap(), None).await;

    let response = server.get("/v1/nothing", WILDCARD).await;
    assert_eq!(response.status, 404);
    assert_eq!(response.body, r#"{"error":"Not found"}"#);

    let response = server.request("PUT", "/v1/sites", WILDCARD, &[], "").await;
    assert_eq!(response.status, 405);

    server.stop();
}

#[tokio::test]
async fn test_api_admin_auth() {
    let server = TestServer::start(TempDir::new().unwrap(), Some(("admin", "s3cret"))).await;

    let response = server.get("/v1/sites", WILDCARD).await;
    assert_eq!(response.status, 401);
    assert!(response.has_header("www-authenticate", "Basic realm=\"api\""));

    let response = server
        .request("GET", "/v1/sites", WILDCARD, &[basic("admin", "nope")], "")
        .await;
    assert_eq!(response.status, 401);

    let response = server
        .request("GET", "/v1/sites", WILDCARD, &[basic("admin", "s3cret")], "")
        .await;
    assert_eq!(response.status, 200);

    // the admin UI itself is not gated
    assert_eq!(server.get("/", WILDCARD).await.status, 200);

    server.stop();
}

#[tokio::test]
async fn test_registry_survives_restart() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let id = {
        let options = RegistryOptions::new(&data, WILDCARD);
        let registry = Registry::new(options).await.unwrap();
        let spec = SiteSpec {
            name: "Kept".to_string(),
            hostnames: vec!["kept.test".to_string()],
            git_url: "https://example.com/kept.git".to_string(),
            ..Default::default()
        };
        let site = registry.add_site(spec, false, true).await.unwrap();
        registry.shutdown();
        site.id().to_string()
    };

    let registry = Registry::new(RegistryOptions::new(&data, WILDCARD))
        .await
        .unwrap();
    let site = registry.site(&id).unwrap();
    assert_eq!(site.hostnames(), ["kept.test"]);
    assert!(registry.table().route("kept.test").is_some());
    registry.shutdown();
}
