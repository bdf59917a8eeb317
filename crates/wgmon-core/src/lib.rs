// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WireGuard Monitor Contributors

// WireGuard Monitor - Core Library
// Unit discovery, reachability probing, and the reconciliation engine

pub mod config;
pub mod connection;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod netstack;
pub mod probe;
pub mod runner;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::MonitorConfig;
pub use connection::TunnelConnection;
pub use discovery::{list_wireguard_units, load_ping_entries};
pub use engine::{CollectionSnapshot, MonitorEngine};
pub use error::{Error, ProbeError, Result};
pub use netstack::{LinkHandle, NetworkStack, SystemNetworkStack};
pub use probe::{PingProber, ProbeOptions, Prober};
pub use runner::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use types::{PingAddressEntry, Status, UnitDescriptor, UnitPreset, UnitState};
