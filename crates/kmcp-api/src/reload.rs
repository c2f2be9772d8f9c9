//! Snapshot publication and hot reload
//!
//! The base clients, the access policy and the tool surface form one
//! immutable [`Snapshot`]. Readers clone the current `Arc<Snapshot>` once per
//! call and keep it for the whole call. The [`ReloadCoordinator`] builds a
//! replacement off to the side whenever a credential source file changes and
//! swaps it in whole; a failed rebuild leaves the current snapshot in place.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kmcp_common::metrics::record_reload;
use kmcp_common::{ResourceKey, StaticConfig};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::access::policy::AccessPolicy;
use crate::access::resources::ResourceClient;
use crate::cluster::{load_base_config, CredentialSource, KubeClients};
use crate::context::CallContext;
use crate::error::Result;
use crate::tools::{ClusterFacts, ToolSettings, ToolSurface};

/// Quiet period after a change before rebuilding
const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Inputs of every rebuild
#[derive(Debug, Clone, Default)]
pub struct ReloadSettings {
    /// Explicit kubeconfig; otherwise the standard search path
    pub kubeconfig: Option<PathBuf>,
    /// Access-control deny rules
    pub denied_resources: Vec<ResourceKey>,
    /// Tool selection
    pub tools: ToolSettings,
}

impl ReloadSettings {
    /// Settings from static configuration
    pub fn from_static(config: &StaticConfig) -> Result<Self> {
        Ok(Self {
            kubeconfig: config.kubeconfig.clone(),
            denied_resources: config.denied_resources.clone(),
            tools: ToolSettings::from_static(config)?,
        })
    }
}

/// Everything a call reads from shared state
pub struct Snapshot {
    /// Administrative client set
    pub base: Arc<KubeClients>,
    /// Access-control policy
    pub policy: AccessPolicy,
    /// Exposed tools
    pub surface: Arc<ToolSurface>,
    /// Facts the surface was computed from
    pub facts: ClusterFacts,
    /// Origin of the base credentials
    pub source: CredentialSource,
    /// Incremented on every successful rebuild
    pub generation: u64,
}

impl Snapshot {
    /// Resource operations scoped to the caller in `ctx`
    pub fn resources(&self, ctx: &CallContext) -> ResourceClient {
        self.base.derive(ctx).resources(&self.policy)
    }
}

/// Build a snapshot from scratch
pub async fn build_snapshot(settings: &ReloadSettings, generation: u64) -> Result<Snapshot> {
    let base = load_base_config(settings.kubeconfig.as_deref()).await?;
    let clients = Arc::new(KubeClients::from_config(base.config, base.kubeconfig)?);
    let facts = ClusterFacts::detect(&clients).await;
    let surface = ToolSurface::compute(&settings.tools, &facts);

    Ok(Snapshot {
        base: clients,
        policy: AccessPolicy::new(settings.denied_resources.clone()),
        surface: Arc::new(surface),
        facts,
        source: base.source,
        generation,
    })
}

/// Atomically replaceable current snapshot
#[derive(Clone)]
pub struct SnapshotCell(Arc<RwLock<Arc<Snapshot>>>);

impl SnapshotCell {
    /// Cell holding `snapshot`
    pub fn new(snapshot: Snapshot) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(snapshot))))
    }

    /// Current snapshot
    pub async fn load(&self) -> Arc<Snapshot> {
        self.0.read().await.clone()
    }

    /// Replace the current snapshot, returning the previous one
    pub async fn publish(&self, snapshot: Arc<Snapshot>) -> Arc<Snapshot> {
        let mut guard = self.0.write().await;
        std::mem::replace(&mut *guard, snapshot)
    }
}

/// Rebuilds and republishes the snapshot when the credential source changes
pub struct ReloadCoordinator {
    settings: ReloadSettings,
    cell: SnapshotCell,
}

impl ReloadCoordinator {
    /// Coordinator publishing into `cell`
    pub fn new(settings: ReloadSettings, cell: SnapshotCell) -> Self {
        Self { settings, cell }
    }

    /// Rebuild and publish
    ///
    /// On failure the current snapshot stays in place and the error is
    /// returned for logging only.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<Arc<Snapshot>> {
        let generation = self.cell.load().await.generation + 1;
        match build_snapshot(&self.settings, generation).await {
            Ok(snapshot) => {
                info!(
                    generation,
                    openshift = snapshot.facts.openshift,
                    tools = %snapshot.surface,
                    "Published new configuration"
                );
                let snapshot = Arc::new(snapshot);
                self.cell.publish(snapshot.clone()).await;
                record_reload(true);
                Ok(snapshot)
            }
            Err(e) => {
                error!(error = %e, "Reload failed, keeping previous configuration");
                record_reload(false);
                Err(e)
            }
        }
    }

    /// Watch the credential source until the task is aborted
    ///
    /// Changes arriving while a rebuild runs are picked up by the next turn
    /// of the loop, so the last write always ends up published. The current
    /// watcher stays armed through each rebuild and is replaced only when the
    /// set of source files changes.
    pub async fn run(self) {
        let (tx, mut rx) = watch::channel(0u64);
        let tx = Arc::new(tx);
        let mut watched = self.cell.load().await.source.watch_paths().to_vec();
        let mut _watcher = watch_paths(&watched, tx.clone());

        while rx.changed().await.is_ok() {
            tokio::time::sleep(SETTLE_DELAY).await;
            let _ = rx.borrow_and_update();
            debug!("Credential source changed");

            let Ok(snapshot) = self.reload().await else {
                continue;
            };
            let current = snapshot.source.watch_paths();
            if current != watched.as_slice() {
                // Assignment drops the previous watcher once the new one is armed
                _watcher = watch_paths(current, tx.clone());
                watched = current.to_vec();
            }
        }
    }

    /// Run the watch loop on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// Directories holding `paths`, each with the file names watched in it
fn watch_targets(paths: &[PathBuf]) -> Vec<(PathBuf, Vec<OsString>)> {
    let mut targets: Vec<(PathBuf, Vec<OsString>)> = Vec::new();
    for path in paths {
        let Some(name) = path.file_name() else {
            continue;
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        match targets.iter_mut().find(|(d, _)| *d == dir) {
            Some((_, names)) => names.push(name.to_os_string()),
            None => targets.push((dir, vec![name.to_os_string()])),
        }
    }
    targets
}

/// Watch the directories containing `paths`
///
/// Directories are watched rather than the files themselves so that a file
/// deleted and re-created, or replaced by rename, keeps producing events.
fn watch_paths(paths: &[PathBuf], tx: Arc<watch::Sender<u64>>) -> Option<RecommendedWatcher> {
    let targets = watch_targets(paths);
    if targets.is_empty() {
        return None;
    }

    let names: Vec<OsString> = targets.iter().flat_map(|(_, n)| n.iter().cloned()).collect();
    let handler = move |res: notify::Result<notify::Event>| match res {
        Ok(event) if matches!(event.kind, EventKind::Access(_)) => {}
        Ok(event) => {
            let relevant = event
                .paths
                .iter()
                .filter_map(|p| p.file_name())
                .any(|name| names.iter().any(|n| n == name));
            if relevant {
                tx.send_modify(|n| *n = n.wrapping_add(1));
            }
        }
        Err(e) => warn!(error = %e, "Credential source watch error"),
    };

    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "Failed to create credential source watcher");
            return None;
        }
    };
    for (dir, _) in &targets {
        match watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => debug!(dir = %dir.display(), "Watching credential source"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to watch credential source"),
        }
    }
    Some(watcher)
}
