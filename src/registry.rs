//! Site registry
//!
//! The registry owns the map of admitted sites and is the single
//! serialization point for adding and removing them. Locking:
//!
//! - `sites` guards the shape of the map. It is never held across an
//!   `.await`, so a slow clone or fetch never blocks admission of other
//!   sites or a rebuild.
//! - Each [`Site`] guards its own git state with its own lock; the registry
//!   never takes a site's sync lock while holding `sites`.
//! - `table` is swapped wholesale after every add or delete. Request
//!   handling loads the current table and never touches `sites`.

use crate::assets::AssetFs;
use crate::auth::constant_time_compare;
use crate::error::{Result, SiteError};
use crate::router::{HttpResponse, RouteTable, RouterConfig};
use crate::site::{Site, SitePublic, SiteSpec};
use crate::store::{Snapshot, SnapshotStore};
use crate::sync::DEFAULT_SYNC_INTERVAL;
use crate::validate::validate;
use arc_swap::ArcSwap;
use hyper::body::{Body, Bytes};
use hyper::Request;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Directory under the data directory holding one clone per site
pub const REPOS_DIR: &str = "repos";

/// Registry construction options
#[derive(Clone)]
pub struct RegistryOptions {
    pub data_dir: PathBuf,
    /// Host the process itself answers on; never assignable to a site
    pub wildcard: String,
    /// Admin API credentials; the API is open when `None`
    pub admin: Option<(String, String)>,
    pub assets: Option<Arc<dyn AssetFs>>,
    pub sync_interval: Duration,
}

impl RegistryOptions {
    pub fn new(data_dir: impl Into<PathBuf>, wildcard: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            wildcard: wildcard.into(),
            admin: None,
            assets: None,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Response body of `GET /v1/sites`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteListing {
    pub static_dirs: BTreeMap<String, SitePublic>,
    pub wild_card: String,
}

pub struct Registry {
    sites: RwLock<HashMap<String, Arc<Site>>>,
    store: SnapshotStore,
    data_dir: PathBuf,
    wildcard: String,
    router_config: RouterConfig,
    sync_interval: Duration,
    table: ArcSwap<RouteTable>,
    /// Ids whose clone directory is being created or removed
    pending: Mutex<HashSet<String>>,
}

/// Releases a claimed id when dropped
struct Reservation<'a> {
    pending: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

impl Registry {
    /// Create the data directory, re-admit every persisted site and build the
    /// first routing table.
    ///
    /// Any persistence failure here is returned: the process must not serve
    /// with an unknown registry state.
    pub async fn new(options: RegistryOptions) -> Result<Arc<Self>> {
        create_private_dir(&options.data_dir)?;

        let registry = Arc::new(Self {
            sites: RwLock::new(HashMap::new()),
            store: SnapshotStore::new(&options.data_dir),
            data_dir: options.data_dir,
            wildcard: options.wildcard.trim().to_lowercase(),
            router_config: RouterConfig::new(options.admin, options.assets),
            sync_interval: options.sync_interval,
            table: ArcSwap::from_pointee(RouteTable::default()),
            pending: Mutex::new(HashSet::new()),
        });

        registry.init().await?;
        registry.rebuild();
        Ok(registry)
    }

    async fn init(&self) -> Result<()> {
        if let Some(snapshot) = self.store.load()? {
            if !snapshot.wildcard.is_empty() && snapshot.wildcard != self.wildcard {
                info!(
                    previous = %snapshot.wildcard,
                    current = %self.wildcard,
                    "Wildcard host changed since last run"
                );
            }
            for (id, mut spec) in snapshot.sites {
                if spec.id.is_empty() {
                    spec.id = id;
                }
                self.add_site(spec, false, false).await?;
            }
        }
        self.save()?;

        info!(
            sites = self.sites.read().len(),
            path = %self.store.path().display(),
            "Loaded site registry"
        );
        Ok(())
    }

    /// Admit a site.
    ///
    /// With `clone_now` the repository is cloned before the site is inserted
    /// and a failing clone rejects the site. With `persist` the snapshot is
    /// saved after insertion; a save failure is returned but the site stays
    /// admitted and served.
    pub async fn add_site(
        &self,
        mut spec: SiteSpec,
        clone_now: bool,
        persist: bool,
    ) -> Result<Arc<Site>> {
        let _reservation = {
            let sites = self.sites.read();
            validate(&mut spec, &self.protected_hostnames(&sites))?;
            self.reserve(&sites, &spec.id)?
        };

        let clone_to = self.repo_dir(&spec.id);
        let site = Arc::new(Site::new(spec, clone_to));

        if clone_now {
            if let Err(e) = site.update().await {
                error!(site = %site, error = %e, "Unable to clone repo");
                site.remove_clone().await;
                return Err(SiteError::Clone);
            }
        }

        let admitted = {
            let mut sites = self.sites.write();

            // Another add may have claimed a hostname while cloning
            let protected = self.protected_hostnames(&sites);
            match site.hostnames().iter().find(|h| protected.contains(*h)) {
                Some(host) => Err(SiteError::validation(format!("Cannot use hostname {host}"))),
                None => {
                    sites.insert(site.id().to_string(), Arc::clone(&site));
                    site.start(self.sync_interval);
                    Ok(if persist {
                        self.save_locked(&sites)
                    } else {
                        Ok(())
                    })
                }
            }
        };

        let persisted = match admitted {
            Ok(persisted) => persisted,
            Err(e) => {
                if clone_now {
                    site.remove_clone().await;
                }
                return Err(e);
            }
        };

        self.rebuild();
        info!(id = %site.id(), site = %site, hostnames = ?site.hostnames(), "Admitted site");

        persisted.map(|()| site)
    }

    /// Remove a site.
    ///
    /// Unknown ids are not an error. When the site has a delete password the
    /// supplied one must match, otherwise the site is left untouched. The
    /// clone is gone by the time this returns, so the id can be added again
    /// straight away.
    pub async fn delete_site(&self, id: &str, password: &str, persist: bool) -> Result<()> {
        let (removed, _reservation, persisted) = {
            let mut sites = self.sites.write();

            let mut reservation = None;
            if let Some(site) = sites.get(id) {
                if !constant_time_compare(&site.spec().delete_password, password) {
                    return Err(SiteError::PasswordMismatch);
                }
                site.stop();
                // Keep the id claimed until the clone is gone
                reservation = Some(self.reserve_removed(id));
            }
            let removed = sites.remove(id);

            let persisted = if persist {
                self.save_locked(&sites)
            } else {
                Ok(())
            };
            (removed, reservation, persisted)
        };

        self.rebuild();

        match removed {
            Some(site) => {
                info!(id, site = %site, "Deleted site");
                site.remove_clone().await;
            }
            None => debug!(id, "Delete of unknown site"),
        }

        persisted
    }

    /// Claim `id` for an add in progress.
    ///
    /// Fails when the id is admitted or already claimed by another add or a
    /// delete that is still removing its clone.
    fn reserve<'a>(
        &'a self,
        sites: &HashMap<String, Arc<Site>>,
        id: &str,
    ) -> Result<Reservation<'a>> {
        let mut pending = self.pending.lock();
        if sites.contains_key(id) || pending.contains(id) {
            return Err(SiteError::validation(format!("Site {id} already exists.")));
        }
        pending.insert(id.to_string());
        Ok(Reservation {
            pending: &self.pending,
            id: id.to_string(),
        })
    }

    fn reserve_removed(&self, id: &str) -> Reservation<'_> {
        self.pending.lock().insert(id.to_string());
        Reservation {
            pending: &self.pending,
            id: id.to_string(),
        }
    }

    /// Redacted view of every site plus the wildcard host
    pub fn list(&self) -> SiteListing {
        let sites = self.sites.read();
        SiteListing {
            static_dirs: sites
                .iter()
                .map(|(id, site)| (id.clone(), site.public_repr()))
                .collect(),
            wild_card: self.wildcard.clone(),
        }
    }

    pub fn site(&self, id: &str) -> Option<Arc<Site>> {
        self.sites.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sites.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.read().is_empty()
    }

    pub fn wildcard(&self) -> &str {
        &self.wildcard
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Where a site's repository is cloned
    pub fn repo_dir(&self, id: &str) -> PathBuf {
        self.data_dir.join(REPOS_DIR).join(id)
    }

    /// Wildcard host plus every hostname claimed by an admitted site
    fn protected_hostnames(&self, sites: &HashMap<String, Arc<Site>>) -> HashSet<String> {
        let mut protected: HashSet<String> = sites
            .values()
            .flat_map(|site| site.hostnames().iter().cloned())
            .collect();
        protected.insert(self.wildcard.clone());
        protected
    }

    /// Persist the current map
    pub fn save(&self) -> Result<()> {
        let sites = self.sites.read();
        self.save_locked(&sites)
    }

    fn save_locked(&self, sites: &HashMap<String, Arc<Site>>) -> Result<()> {
        let snapshot = Snapshot {
            sites: sites
                .iter()
                .map(|(id, site)| (id.clone(), site.spec().clone()))
                .collect(),
            wildcard: self.wildcard.clone(),
        };
        self.store.save(&snapshot).inspect_err(|e| {
            error!(path = %self.store.path().display(), error = %e, "Failed to save registry");
        })
    }

    /// Build a routing table from the current sites and make it live
    pub fn rebuild(&self) {
        let sites: Vec<Arc<Site>> = self.sites.read().values().cloned().collect();
        let table = RouteTable::build(&sites, &self.router_config);
        debug!(hosts = table.len(), "Rebuilt routing table");
        self.table.store(Arc::new(table));
    }

    /// The routing table currently serving requests
    pub fn table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Serve one request through the current routing table
    pub async fn handle<B>(&self, req: Request<B>, remote: Option<SocketAddr>) -> HttpResponse
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let table = self.table.load_full();
        table.serve(req, self, remote).await
    }

    /// Stop every site's synchronizer
    pub fn shutdown(&self) {
        for site in self.sites.read().values() {
            site.stop();
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("data_dir", &self.data_dir)
            .field("wildcard", &self.wildcard)
            .field("sites", &self.sites.read().len())
            .finish()
    }
}

/// Create `path` (and parents) readable only by the current user
fn create_private_dir(path: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)?;
    Ok(())
}
