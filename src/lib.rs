//! Sitehost - A multi-tenant static site host backed by git
//!
//! This library provides a web server that:
//! - Binds each site's hostnames to the content of a git branch
//! - Keeps every site's local clone in sync with its remote on a timer
//! - Dispatches requests by Host header through an atomically swapped route table
//! - Optionally gates a site's content with HTTP basic auth
//! - Manages sites through a JSON API and a small embedded admin UI
//! - Persists the registry to a single JSON snapshot

pub mod api;
pub mod assets;
pub mod auth;
pub mod config;
pub mod error;
pub mod files;
pub mod git;
pub mod registry;
pub mod router;
pub mod server;
pub mod site;
pub mod store;
pub mod sync;
pub mod tls;
pub mod validate;

pub use error::{Result, SiteError};
pub use registry::{Registry, RegistryOptions};
pub use site::{Site, SiteSpec};

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
