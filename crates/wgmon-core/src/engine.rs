// WireGuard Monitor - Reconciliation Engine
// Keeps the tracked connection set in sync with systemd units, the
// ping-address file, and the kernel's link table

use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::connection::TunnelConnection;
use crate::discovery;
use crate::error::Result;
use crate::netstack::NetworkStack;
use crate::probe::Prober;
use crate::runner::CommandRunner;

/// Immutable snapshot of the tracked connections, sorted by interface name
pub type CollectionSnapshot = Arc<Vec<Arc<TunnelConnection>>>;

/// Discovers WireGuard units and drives one [`TunnelConnection`] per
/// interface.
///
/// Cheap to clone; clones share the connection set. Reconciliation runs
/// once on [`start`](MonitorEngine::start) and again on every link-change
/// event until [`stop`](MonitorEngine::stop).
#[derive(Clone)]
pub struct MonitorEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    connections: RwLock<Vec<Arc<TunnelConnection>>>,
    collection_tx: watch::Sender<CollectionSnapshot>,
    /// Root token; every connection's token is a child of it
    cancel: CancellationToken,
    runner: Arc<dyn CommandRunner>,
    netstack: Arc<dyn NetworkStack>,
    prober: Arc<dyn Prober>,
    config: Arc<MonitorConfig>,
}

impl MonitorEngine {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        netstack: Arc<dyn NetworkStack>,
        prober: Arc<dyn Prober>,
        config: Arc<MonitorConfig>,
    ) -> Self {
        let (collection_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            inner: Arc::new(EngineInner {
                connections: RwLock::new(Vec::new()),
                collection_tx,
                cancel: CancellationToken::new(),
                runner,
                netstack,
                prober,
                config,
            }),
        }
    }

    /// Current connection snapshot. The list only changes when a unit
    /// appears or disappears; field updates happen in place.
    pub fn connections(&self) -> CollectionSnapshot {
        self.inner.collection_tx.borrow().clone()
    }

    /// Watch for connections being added or removed
    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot> {
        self.inner.collection_tx.subscribe()
    }

    pub fn find(&self, name: &str) -> Option<Arc<TunnelConnection>> {
        self.connections().iter().find(|c| c.name() == name).cloned()
    }

    /// Run the initial reconciliation and follow link-change events until
    /// the engine is stopped. A failing initial pass is logged, not fatal;
    /// the next link event retries it.
    pub async fn start(&self) {
        if let Err(e) = self.reconcile(false).await {
            error!("Initial reconcile failed: {}", e);
        }

        let engine = self.clone();
        let cancel = self.inner.cancel.clone();
        let mut events = self.inner.netstack.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = events.changed() => {
                        if changed.is_err() {
                            debug!("Link event source closed, stopping rescans");
                            break;
                        }
                        debug!("Link change event, rescanning interfaces");
                        if let Err(e) = engine.reconcile(false).await {
                            warn!("Interface rescan failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Stop all probing. The last collection snapshot stays readable, but
    /// its connections no longer update.
    pub fn stop(&self) {
        info!("Stopping monitor engine");
        self.inner.cancel.cancel();
    }

    /// Bring the connection set in line with the system.
    ///
    /// Gathers units, ping-address entries, and active links, then applies
    /// them: connections whose unit disappeared are destroyed and dropped,
    /// survivors get their fields updated in place, and new units get fresh
    /// connections. Observers are notified only when the membership of the
    /// set changed.
    ///
    /// With `skip_unit_rescan` the current unit set is reused instead of
    /// asking the service manager again; callers use this when only the
    /// ping-address file changed.
    ///
    /// A failure to enumerate units or links aborts the pass with no
    /// changes applied. A missing or unreadable ping-address file is not an
    /// error; it yields no entries.
    pub async fn reconcile(&self, skip_unit_rescan: bool) -> Result<()> {
        let inner = &self.inner;

        let units = if skip_unit_rescan {
            inner
                .connections
                .read()
                .await
                .iter()
                .map(|c| c.unit())
                .collect()
        } else {
            discovery::list_wireguard_units(inner.runner.as_ref()).await?
        };
        let entries = discovery::load_ping_entries(&inner.config.ping_address_file).await;
        let links = inner.netstack.active_links().await?;

        let mut connections = inner.connections.write().await;
        let mut changed = false;

        // Drop connections whose unit file disappeared
        connections.retain(|conn| {
            let keep = units.iter().any(|u| u.wg_interface() == Some(conn.name()));
            if !keep {
                info!("{}: unit file gone, dropping connection", conn.name());
                conn.destroy();
                changed = true;
            }
            keep
        });

        for unit in units {
            let Some(name) = unit.wg_interface().map(str::to_string) else {
                continue;
            };
            let active_link = links.iter().find(|l| l.ifname == name).cloned();
            let entry = entries.iter().find(|e| e.name == name);
            let address = entry.map(|e| e.address.clone());
            let alias = entry.and_then(|e| e.alias.clone());

            match connections.iter().find(|c| c.name() == name).cloned() {
                Some(conn) => {
                    conn.set_unit(unit);
                    conn.set_active_link(active_link).await;
                    conn.set_ping_address(address).await;
                    conn.set_alias(alias);
                }
                None => {
                    debug!("{}: tracking new WireGuard unit", name);
                    let conn = TunnelConnection::new(
                        name,
                        unit,
                        inner.cancel.child_token(),
                        inner.runner.clone(),
                        inner.netstack.clone(),
                        inner.prober.clone(),
                        inner.config.clone(),
                    );
                    conn.set_active_link(active_link).await;
                    conn.set_ping_address(address).await;
                    conn.set_alias(alias);
                    connections.push(conn);
                    changed = true;
                }
            }
        }

        if changed {
            connections.sort_by(|a, b| a.name().cmp(b.name()));
            inner.collection_tx.send_replace(Arc::new(connections.clone()));
            info!("Tracking {} WireGuard connection(s)", connections.len());
        }

        Ok(())
    }
}
