// WireGuard Monitor - Tunnel Connection
// Per-interface state machine driving the reachability probe cycle

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::netstack::{LinkHandle, NetworkStack};
use crate::probe::{ProbeOptions, Prober};
use crate::runner::CommandRunner;
use crate::types::{Status, UnitDescriptor};

/// One tracked WireGuard interface.
///
/// The connection owns its status, latency, and toggling flag, and exactly
/// one in-flight probe/retry chain. Every mutable field sits behind a watch
/// channel, so observers can follow individual fields without polling.
/// Fields are written only by this connection's own state machine and by
/// the reconciliation engine.
pub struct TunnelConnection {
    /// Interface name; the identity of this connection across rescans
    name: String,

    unit_tx: watch::Sender<UnitDescriptor>,
    link_tx: watch::Sender<Option<LinkHandle>>,
    ping_tx: watch::Sender<Option<String>>,
    alias_tx: watch::Sender<Option<String>>,
    status_tx: watch::Sender<Status>,
    latency_tx: watch::Sender<f64>,
    toggling_tx: watch::Sender<bool>,

    /// Cancelled once, when the engine drops this connection
    cancel: CancellationToken,
    /// Scope of the current probe/retry chain. `recheck` cancels and
    /// replaces it; the lock also serializes chain state writes against a
    /// finishing probe task, so a superseded result can never apply.
    scope: Mutex<CancellationToken>,

    runner: Arc<dyn CommandRunner>,
    netstack: Arc<dyn NetworkStack>,
    prober: Arc<dyn Prober>,
    config: Arc<MonitorConfig>,
}

impl TunnelConnection {
    pub(crate) fn new(
        name: String,
        unit: UnitDescriptor,
        cancel: CancellationToken,
        runner: Arc<dyn CommandRunner>,
        netstack: Arc<dyn NetworkStack>,
        prober: Arc<dyn Prober>,
        config: Arc<MonitorConfig>,
    ) -> Arc<Self> {
        assert_eq!(
            unit.wg_interface(),
            Some(name.as_str()),
            "unit file {} is not for this WireGuard connection",
            unit.unit_file
        );

        let (unit_tx, _) = watch::channel(unit);
        let (link_tx, _) = watch::channel(None);
        let (ping_tx, _) = watch::channel(None);
        let (alias_tx, _) = watch::channel(None);
        let (status_tx, _) = watch::channel(Status::Unknown);
        let (latency_tx, _) = watch::channel(-1.0);
        let (toggling_tx, _) = watch::channel(false);
        let scope = Mutex::new(cancel.child_token());

        Arc::new(Self {
            name,
            unit_tx,
            link_tx,
            ping_tx,
            alias_tx,
            status_tx,
            latency_tx,
            toggling_tx,
            cancel,
            scope,
            runner,
            netstack,
            prober,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> UnitDescriptor {
        self.unit_tx.borrow().clone()
    }

    pub fn active_link(&self) -> Option<LinkHandle> {
        self.link_tx.borrow().clone()
    }

    pub fn ping_address(&self) -> Option<String> {
        self.ping_tx.borrow().clone()
    }

    pub fn alias(&self) -> Option<String> {
        self.alias_tx.borrow().clone()
    }

    pub fn status(&self) -> Status {
        *self.status_tx.borrow()
    }

    /// Mean latency of the last successful probe in milliseconds, or -1
    /// when unknown or stale
    pub fn latency_ms(&self) -> f64 {
        *self.latency_tx.borrow()
    }

    pub fn is_toggling(&self) -> bool {
        *self.toggling_tx.borrow()
    }

    pub fn is_destroyed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn subscribe_unit(&self) -> watch::Receiver<UnitDescriptor> {
        self.unit_tx.subscribe()
    }

    pub fn subscribe_active_link(&self) -> watch::Receiver<Option<LinkHandle>> {
        self.link_tx.subscribe()
    }

    pub fn subscribe_ping_address(&self) -> watch::Receiver<Option<String>> {
        self.ping_tx.subscribe()
    }

    pub fn subscribe_alias(&self) -> watch::Receiver<Option<String>> {
        self.alias_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_latency(&self) -> watch::Receiver<f64> {
        self.latency_tx.subscribe()
    }

    pub fn subscribe_toggling(&self) -> watch::Receiver<bool> {
        self.toggling_tx.subscribe()
    }

    /// Replace the unit metadata. Panics if the descriptor belongs to a
    /// different interface; matching against the wrong entity is a bug in
    /// the caller, not a runtime condition.
    pub(crate) fn set_unit(&self, unit: UnitDescriptor) {
        assert_eq!(
            unit.wg_interface(),
            Some(self.name.as_str()),
            "unit file {} is not for this WireGuard connection",
            unit.unit_file
        );
        self.unit_tx.send_if_modified(|current| {
            if *current == unit {
                false
            } else {
                *current = unit;
                true
            }
        });
    }

    pub(crate) fn set_alias(&self, alias: Option<String>) {
        self.alias_tx.send_if_modified(|current| {
            if *current == alias {
                false
            } else {
                *current = alias;
                true
            }
        });
    }

    /// Update the active-link handle; a change invalidates the running
    /// probe chain and re-evaluates the status.
    pub(crate) async fn set_active_link(self: &Arc<Self>, link: Option<LinkHandle>) {
        let changed = self.link_tx.send_if_modified(|current| {
            if *current == link {
                false
            } else {
                *current = link;
                true
            }
        });
        if changed {
            self.recheck().await;
        }
    }

    /// Update the probe target; a change invalidates the running probe
    /// chain and re-evaluates the status.
    pub(crate) async fn set_ping_address(self: &Arc<Self>, address: Option<String>) {
        let changed = self.ping_tx.send_if_modified(|current| {
            if *current == address {
                false
            } else {
                *current = address;
                true
            }
        });
        if changed {
            self.recheck().await;
        }
    }

    /// Start or stop the tunnel through the privileged helper.
    ///
    /// A second call while one is in flight is a no-op. The call does not
    /// drive `status` itself; the state machine reacts once the network
    /// stack reports the link up or down.
    pub async fn set_active(&self, active: bool) -> Result<()> {
        if !self.begin_toggle() {
            debug!("{}: toggle already in flight, ignoring", self.name);
            return Ok(());
        }

        let action = if active { "start" } else { "stop" };
        info!("{}: running helper to {} tunnel", self.name, action);
        let helper = self.config.helper_path.to_string_lossy();
        let result = self
            .runner
            .run("sudo", &[helper.as_ref(), action, &self.name])
            .await;
        self.end_toggle();

        if let Err(e) = &result {
            warn!("{}: helper {} failed: {}", self.name, action, e);
        }
        result.map(|_| ())
    }

    /// Tear down the probe chain for good. Called by the engine when the
    /// interface disappears from discovery output.
    pub(crate) fn destroy(&self) {
        debug!("{}: destroyed", self.name);
        self.cancel.cancel();
    }

    /// Re-evaluate the status from the current inputs.
    ///
    /// Supersedes the previous probe/retry chain unconditionally, decides
    /// the probe-free statuses synchronously, and spawns a probe cycle for
    /// the rest.
    pub(crate) async fn recheck(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }

        let mut scope_guard = self.scope.lock().await;
        scope_guard.cancel();
        *scope_guard = self.cancel.child_token();
        let scope = scope_guard.clone();

        if self.active_link().is_none() {
            self.set_status(Status::Disabled);
            self.write_latency(-1.0);
            return;
        }

        let Some(address) = self.ping_address() else {
            self.set_status(Status::Unknown);
            return;
        };

        // Announce the probing transition before the first result
        if matches!(self.status(), Status::Unknown | Status::Disabled) {
            self.set_status(Status::Connecting);
        }
        drop(scope_guard);

        let conn = Arc::clone(self);
        tokio::spawn(async move {
            TunnelConnection::run_cycle(conn, address, scope).await;
        });
    }

    /// One probe cycle: settle, check the link for IP configuration, probe,
    /// apply the result, and schedule the next cycle. Every suspension
    /// point races `scope`, and results only apply while `scope` is still
    /// the connection's live chain.
    ///
    /// Boxed because the cycle recurses through `recheck`.
    fn run_cycle(
        conn: Arc<TunnelConnection>,
        address: String,
        scope: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            // Give the OS a moment to populate route and address configuration
            // on a freshly activated link
            tokio::select! {
                biased;
                () = scope.cancelled() => return,
                () = tokio::time::sleep(conn.config.settle_delay()) => {}
            }

            let has_ip = conn.netstack.has_ip_config(&conn.name).await;

            {
                let _guard = conn.scope.lock().await;
                if scope.is_cancelled() {
                    return;
                }
                if !has_ip {
                    warn!("No IP configuration on {}, cannot check reachability", conn.name);
                    conn.set_status(Status::MissingIp);
                    // No retry from here; recovery needs a new input change
                    return;
                }
                if !conn.status().is_settled() {
                    conn.set_status(Status::Connecting);
                }
            }

            let options = ProbeOptions {
                timeout: conn.config.probe_timeout(),
                attempts: conn.config.probe_attempts,
                interface: Some(conn.name.clone()),
            };
            let result = conn.prober.probe(&address, &options, &scope).await;

            {
                let _guard = conn.scope.lock().await;
                if scope.is_cancelled() {
                    return;
                }
                match result {
                    Ok(latency) => {
                        debug!("{}: reachable, {:.1} ms", conn.name, latency);
                        conn.report_latency(latency);
                        conn.set_status(Status::Connected);
                    }
                    Err(e) if e.is_cancelled() => return,
                    Err(e) => {
                        debug!("{}: probe failed: {}", conn.name, e);
                        conn.report_latency(-1.0);
                        conn.set_status(Status::Disconnected);
                    }
                }
            }

            // Re-probe on a fixed cadence; any input change supersedes this timer
            tokio::select! {
                biased;
                () = scope.cancelled() => return,
                () = tokio::time::sleep(conn.config.retry_interval()) => {}
            }
            conn.recheck().await;
        })
    }

    fn set_status(&self, status: Status) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            debug!("{}: status -> {}", self.name, status);
        }
    }

    /// A probe result may not paint latency onto a tunnel the user just
    /// disabled or is in the middle of toggling
    fn report_latency(&self, latency: f64) {
        if self.status() == Status::Disabled || self.is_toggling() {
            debug!("{}: discarding latency report", self.name);
            return;
        }
        self.write_latency(latency);
    }

    fn write_latency(&self, latency: f64) {
        self.latency_tx.send_if_modified(|current| {
            if *current == latency {
                false
            } else {
                *current = latency;
                true
            }
        });
    }

    /// Atomic test-and-set of the toggling flag
    fn begin_toggle(&self) -> bool {
        self.toggling_tx.send_if_modified(|toggling| {
            if *toggling {
                false
            } else {
                *toggling = true;
                true
            }
        })
    }

    fn end_toggle(&self) {
        self.toggling_tx.send_if_modified(|toggling| {
            if *toggling {
                *toggling = false;
                true
            } else {
                false
            }
        });
    }
}

impl fmt::Debug for TunnelConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("latency_ms", &self.latency_ms())
            .field("toggling", &self.is_toggling())
            .finish()
    }
}
