// Network stack view: which links are up, whether they carry addresses,
// and a change feed driven by `ip monitor`

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::runner::CommandRunner;

/// An OS-level link that is currently up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    pub index: u32,
    pub ifname: String,
}

/// Live view of the OS network stack.
///
/// The engine derives each connection's active handle from
/// [`active_links`], asks [`has_ip_config`] during the probe cycle, and
/// reconciles whenever the [`subscribe`] generation counter moves.
///
/// [`active_links`]: NetworkStack::active_links
/// [`has_ip_config`]: NetworkStack::has_ip_config
/// [`subscribe`]: NetworkStack::subscribe
#[async_trait]
pub trait NetworkStack: Send + Sync {
    /// Links that are currently up
    async fn active_links(&self) -> Result<Vec<LinkHandle>>;

    /// Whether the named interface has at least one address configured
    async fn has_ip_config(&self, ifname: &str) -> bool;

    /// Change notifications: a generation counter bumped on every link event
    fn subscribe(&self) -> watch::Receiver<u64>;
}

#[derive(Debug, Deserialize)]
struct IpLink {
    ifindex: u32,
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct IpAddrEntry {
    #[serde(default)]
    addr_info: Vec<serde_json::Value>,
}

/// Network stack backed by iproute2: `ip -j link show`, `ip -j addr show`
/// and a long-running `ip monitor link` child for change events
pub struct SystemNetworkStack {
    runner: Arc<dyn CommandRunner>,
    generation: watch::Sender<u64>,
}

impl SystemNetworkStack {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let (generation, _) = watch::channel(0);
        Self { runner, generation }
    }

    /// Spawn the `ip monitor link` watcher. Every line it prints bumps the
    /// generation counter observed through [`NetworkStack::subscribe`].
    /// The watcher stops when `cancel` fires or the child exits.
    pub fn spawn_monitor(&self, cancel: CancellationToken) {
        let generation = self.generation.clone();
        tokio::spawn(async move {
            let mut child = match Command::new("ip")
                .args(["monitor", "link"])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
            {
                Ok(child) => child,
                Err(e) => {
                    warn!("Could not start ip monitor, link events disabled: {}", e);
                    return;
                }
            };

            let Some(stdout) = child.stdout.take() else {
                return;
            };
            let mut lines = BufReader::new(stdout).lines();

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            debug!("Link event: {}", line.trim());
                            generation.send_modify(|g| *g += 1);
                        }
                        Ok(None) => {
                            warn!("ip monitor exited, link events disabled");
                            break;
                        }
                        Err(e) => {
                            warn!("ip monitor read failed: {}", e);
                            break;
                        }
                    },
                }
            }
        });
    }
}

#[async_trait]
impl NetworkStack for SystemNetworkStack {
    async fn active_links(&self) -> Result<Vec<LinkHandle>> {
        let output = self.runner.run("ip", &["-j", "link", "show"]).await?;
        let links: Vec<IpLink> = serde_json::from_str(&output.stdout)?;

        Ok(links
            .into_iter()
            .filter(|link| link.flags.iter().any(|flag| flag == "UP"))
            .map(|link| LinkHandle {
                index: link.ifindex,
                ifname: link.ifname,
            })
            .collect())
    }

    async fn has_ip_config(&self, ifname: &str) -> bool {
        let output = match self
            .runner
            .run("ip", &["-j", "addr", "show", "dev", ifname])
            .await
        {
            Ok(output) => output,
            Err(e) => {
                // The device may already be gone again
                debug!("ip addr show {} failed: {}", ifname, e);
                return false;
            }
        };

        match serde_json::from_str::<Vec<IpAddrEntry>>(&output.stdout) {
            Ok(entries) => entries.iter().any(|entry| !entry.addr_info.is_empty()),
            Err(e) => {
                warn!("Unparseable ip addr output for {}: {}", ifname, e);
                false
            }
        }
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}
