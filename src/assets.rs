//! Asset filesystem for the admin web UI
//!
//! Requests that match no tenant host and no API route fall through to an
//! [`AssetFs`]. The built-in implementation embeds a small single-page UI
//! for listing, adding and deleting sites through the `/v1/sites` API.

use crate::files::{self, mime};
use crate::router::HttpResponse;
use hyper::body::Bytes;
use hyper::{Method, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A file opened from an asset filesystem
#[derive(Debug, Clone)]
pub struct Asset {
    pub content: Bytes,
    pub content_type: &'static str,
}

/// Read-only filesystem of UI assets
pub trait AssetFs: Send + Sync {
    /// Open the asset at `path` (relative, without a leading slash).
    ///
    /// May block; [`serve`] calls it on the blocking thread pool.
    fn open(&self, path: &str) -> Option<Asset>;
}

/// The admin UI compiled into the binary
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedAssets;

impl AssetFs for EmbeddedAssets {
    fn open(&self, path: &str) -> Option<Asset> {
        let (content, content_type) = match path {
            "index.html" => (INDEX_HTML, mime::HTML),
            "app.js" => (APP_JS, mime::JAVASCRIPT),
            "style.css" => (STYLE_CSS, mime::CSS),
            _ => return None,
        };
        Some(Asset {
            content: Bytes::from_static(content.as_bytes()),
            content_type,
        })
    }
}

/// Assets read from a directory on disk, e.g. a locally built UI
#[derive(Debug, Clone)]
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetFs for DirAssets {
    fn open(&self, path: &str) -> Option<Asset> {
        if path.split('/').any(|segment| segment == "..") {
            return None;
        }
        let root = self.root.canonicalize().ok()?;
        let full = self.root.join(path).canonicalize().ok()?;
        if !full.starts_with(&root) {
            debug!(path, root = %root.display(), "Rejected asset outside root");
            return None;
        }
        if !full.is_file() {
            return None;
        }
        let content = std::fs::read(&full).ok()?;
        Some(Asset {
            content: Bytes::from(content),
            content_type: mime::from_path(path),
        })
    }
}

/// Serve a request path from `fs`; `/` and directory paths map to `index.html`
pub async fn serve(fs: Arc<dyn AssetFs>, method: &Method, request_path: &str) -> HttpResponse {
    if method != Method::GET && method != Method::HEAD {
        return files::not_found();
    }
    let Some(decoded) = files::decode_path(request_path) else {
        return files::not_found();
    };
    let mut path = decoded.trim_start_matches('/').to_string();
    if path.is_empty() || path.ends_with('/') {
        path.push_str("index.html");
    }

    match tokio::task::spawn_blocking(move || fs.open(&path)).await {
        Ok(Some(asset)) => {
            files::respond(method, StatusCode::OK, asset.content_type, asset.content)
        }
        Ok(None) => files::not_found(),
        Err(e) => {
            warn!(path = %request_path, error = %e, "Asset read failed");
            files::not_found()
        }
    }
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Sites</title>
    <link rel="stylesheet" href="/style.css">
</head>
<body>
    <nav class="navbar">
        <h1>Sites</h1>
        <span id="wildcard" class="muted"></span>
    </nav>
    <main>
        <section>
            <table id="sites">
                <thead>
                    <tr><th>Name</th><th>Hostnames</th><th>Repository</th><th>Branch</th><th>Root</th><th>Status</th><th></th></tr>
                </thead>
                <tbody></tbody>
            </table>
            <p id="empty" class="muted" hidden>No sites yet.</p>
        </section>
        <section>
            <h2>Add site</h2>
            <form id="add-site">
                <label>Name <input name="name" required></label>
                <label>Hostnames <input name="hostnames" placeholder="a.example.com, b.example.com" required></label>
                <label>Git repository <input name="git_repo" required></label>
                <label>Branch <input name="branch" placeholder="master"></label>
                <label>Root <input name="root" placeholder="/"></label>
                <label>Delete password <input name="delete_password" type="password"></label>
                <label>Access username <input name="access_username"></label>
                <label>Access password <input name="access_password" type="password"></label>
                <label>SSH key <textarea name="ssh_key" rows="4"></textarea></label>
                <button type="submit">Add</button>
                <p id="error" class="error"></p>
            </form>
        </section>
    </main>
    <script src="/app.js"></script>
</body>
</html>
"##;

const APP_JS: &str = r##"const api = '/v1/sites';

async function loadSites() {
    const res = await fetch(api);
    const data = await res.json();
    document.getElementById('wildcard').textContent = data.wild_card || '';
    const body = document.querySelector('#sites tbody');
    body.innerHTML = '';
    const sites = Object.values(data.static_dirs || {});
    document.getElementById('empty').hidden = sites.length > 0;
    for (const site of sites) {
        const row = document.createElement('tr');
        for (const value of [site.name, site.hostnames.join(', '), site.git_repo, site.branch, site.root]) {
            const cell = document.createElement('td');
            cell.textContent = value;
            row.appendChild(cell);
        }
        const status = document.createElement('td');
        status.textContent = site.healthy ? 'healthy' : 'unhealthy';
        status.className = site.healthy ? 'ok' : 'error';
        row.appendChild(status);

        const actions = document.createElement('td');
        const button = document.createElement('button');
        button.textContent = 'Delete';
        button.onclick = () => deleteSite(site);
        actions.appendChild(button);
        row.appendChild(actions);
        body.appendChild(row);
    }
}

async function deleteSite(site) {
    let path = api + '/' + encodeURIComponent(site.id);
    if (site.has_delete_password) {
        const password = prompt('Delete password for ' + site.name);
        if (password === null) return;
        path += '/' + encodeURIComponent(password);
    } else if (!confirm('Delete ' + site.name + '?')) {
        return;
    }
    const res = await fetch(path, { method: 'DELETE' });
    const data = await res.json();
    if (data.error) alert(data.error);
    await loadSites();
}

document.getElementById('add-site').addEventListener('submit', async (event) => {
    event.preventDefault();
    const form = new FormData(event.target);
    const site = Object.fromEntries(form.entries());
    site.hostnames = site.hostnames.split(',').map((h) => h.trim()).filter((h) => h);
    const error = document.getElementById('error');
    error.textContent = 'Cloning...';
    const res = await fetch(api, { method: 'POST', body: JSON.stringify(site) });
    const data = await res.json();
    error.textContent = data.error || '';
    if (!data.error) {
        event.target.reset();
        await loadSites();
    }
});

loadSites();
"##;

const STYLE_CSS: &str = r##"body { font-family: system-ui, sans-serif; margin: 0; color: #222; }
.navbar { display: flex; align-items: baseline; gap: 1rem; padding: 0.75rem 1.5rem; background: #1f2937; color: #fff; }
.navbar h1 { font-size: 1.25rem; margin: 0; }
main { padding: 1.5rem; max-width: 72rem; }
table { border-collapse: collapse; width: 100%; }
th, td { text-align: left; padding: 0.4rem 0.6rem; border-bottom: 1px solid #e5e7eb; }
form { display: grid; gap: 0.5rem; max-width: 32rem; }
label { display: grid; gap: 0.2rem; font-size: 0.9rem; }
input, textarea { padding: 0.35rem; font: inherit; }
button { width: fit-content; padding: 0.35rem 0.9rem; cursor: pointer; }
.muted { color: #9ca3af; }
.ok { color: #15803d; }
.error { color: #b91c1c; }
"##;
