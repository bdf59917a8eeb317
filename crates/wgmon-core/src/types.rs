// Core types for the WireGuard monitor

use std::fmt;

use serde::{Deserialize, Serialize};

/// Health of a tunnel connection as determined by the probe state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No probe target configured, or not yet evaluated
    Unknown,
    /// No active link exists at the OS level
    Disabled,
    /// A link exists and a probe cycle is starting or awaiting its first result
    Connecting,
    /// A link exists but carried no IP configuration after the settle delay
    MissingIp,
    /// Last probe succeeded; the latency value is current
    Connected,
    /// Last probe genuinely failed (not cancelled)
    Disconnected,
}

impl Status {
    /// Check if the status represents a live, probed tunnel
    pub fn is_connected(&self) -> bool {
        matches!(self, Status::Connected)
    }

    /// Check if a probe cycle has already produced a result for this status
    pub fn is_settled(&self) -> bool {
        matches!(self, Status::Connected | Status::Disconnected)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Unknown => "Unknown",
            Status::Disabled => "Disabled",
            Status::Connecting => "Connecting",
            Status::MissingIp => "Missing IP address",
            Status::Connected => "Connected",
            Status::Disconnected => "Disconnected",
        };
        f.write_str(label)
    }
}

/// Enablement state of a unit file, as reported by `systemctl list-unit-files`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Enabled,
    Disabled,
    Static,
    Masked,
    Generated,
    Indirect,
    Linked,
    /// Any state string this version does not know about
    #[serde(other)]
    Other,
}

/// Vendor preset of a unit file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnitPreset {
    Enabled,
    Disabled,
    Masked,
    Static,
    Ignored,
    Bad,
    #[serde(other)]
    Other,
}

/// One entry from the service manager's unit-file listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitDescriptor {
    /// Raw unit identifier, e.g. `wg-quick@home.service`
    pub unit_file: String,
    pub state: UnitState,
    pub preset: UnitPreset,
}

impl UnitDescriptor {
    /// Interface name for this unit, if it follows the WireGuard naming
    /// convention.
    pub fn wg_interface(&self) -> Option<&str> {
        wg_interface_name(&self.unit_file)
    }
}

/// One line of the ping-address file: which address to probe for an
/// interface, and an optional display alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingAddressEntry {
    pub name: String,
    pub address: String,
    pub alias: Option<String>,
}

/// Derive the interface name from a WireGuard service unit identifier.
///
/// WireGuard units are named `wg-quick@<ifname>.service` (template
/// instances) or `wg-quick-<ifname>.service`; anything else is not a
/// WireGuard unit and yields `None`.
pub fn wg_interface_name(unit_file: &str) -> Option<&str> {
    let rest = unit_file
        .strip_prefix("wg-quick@")
        .or_else(|| unit_file.strip_prefix("wg-quick-"))?;
    let name = rest.strip_suffix(".service")?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
