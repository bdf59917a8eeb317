// External source loaders: the systemd unit listing and the ping-address file

use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::runner::CommandRunner;
use crate::types::{PingAddressEntry, UnitDescriptor};

const SYSTEMCTL_ARGS: &[&str] = &[
    "list-unit-files",
    "--type=service",
    "--all",
    "--no-pager",
    "--output=json",
];

/// Query systemd for WireGuard service units.
///
/// Every unit in the listing that does not follow the `wg-quick` naming
/// convention is ignored. A failing listing command is an error; callers
/// must not confuse it with "no units installed".
pub async fn list_wireguard_units(runner: &dyn CommandRunner) -> Result<Vec<UnitDescriptor>> {
    let output = runner.run("systemctl", SYSTEMCTL_ARGS).await?;
    let units: Vec<UnitDescriptor> = serde_json::from_str(&output.stdout)?;

    let wireguard: Vec<UnitDescriptor> = units
        .into_iter()
        .filter(|unit| unit.wg_interface().is_some())
        .collect();
    debug!("Unit listing: {} WireGuard unit(s)", wireguard.len());
    Ok(wireguard)
}

/// Load the ping-address file.
///
/// A missing or unreadable file is not fatal: it is logged and treated as
/// an empty entry set, leaving connections without a probe target.
pub async fn load_ping_entries(path: &Path) -> Vec<PingAddressEntry> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => parse_ping_entries(&contents),
        Err(e) => {
            warn!("Failed to read ping address file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Parse ping-address lines of the form `<name> <address> <alias words...>`.
///
/// Lines missing a name or address are dropped silently. Everything after
/// the address, embedded spaces included, is the alias; an empty remainder
/// means no alias.
pub fn parse_ping_entries(contents: &str) -> Vec<PingAddressEntry> {
    let mut entries = Vec::new();
    for line in contents.lines() {
        let mut parts = line.splitn(3, ' ');
        let name = parts.next().unwrap_or_default();
        let address = parts.next().unwrap_or_default();
        if name.is_empty() || address.is_empty() {
            continue;
        }
        let alias = parts
            .next()
            .filter(|alias| !alias.is_empty())
            .map(str::to_string);
        entries.push(PingAddressEntry {
            name: name.to_string(),
            address: address.to_string(),
            alias,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testutil::MockRunner;
    use crate::types::{UnitPreset, UnitState};

    #[test]
    fn test_parse_single_entry() {
        let entries = parse_ping_entries("home 10.0.0.1 Home-VPN\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "home");
        assert_eq!(entries[0].address, "10.0.0.1");
        assert_eq!(entries[0].alias.as_deref(), Some("Home-VPN"));
    }

    #[test]
    fn test_parse_alias_keeps_embedded_spaces() {
        let entries = parse_ping_entries("home 10.0.0.1 Home VPN (Berlin)\n");
        assert_eq!(entries[0].alias.as_deref(), Some("Home VPN (Berlin)"));
    }

    #[test]
    fn test_parse_entry_without_alias() {
        let entries = parse_ping_entries("work 192.168.4.1\n");
        assert_eq!(entries[0].alias, None);
    }

    #[test]
    fn test_parse_skips_incomplete_lines() {
        let entries = parse_ping_entries("home\n\nwork 10.0.0.2\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "work");
    }

    #[test]
    fn test_parse_trailing_space_means_no_alias() {
        let entries = parse_ping_entries("home 10.0.0.1 ");
        assert_eq!(entries[0].alias, None);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let entries = load_ping_entries(&dir.path().join("no-such-file")).await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_load_reads_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping-address");
        std::fs::write(&path, "home 10.0.0.1 Home-VPN\nwork 10.0.0.2\n").unwrap();

        let entries = load_ping_entries(&path).await;
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_list_filters_to_wireguard_units() {
        let runner = MockRunner::new();
        runner.script_stdout(
            "systemctl",
            r#"[
                {"unit_file":"sshd.service","state":"enabled","preset":"enabled"},
                {"unit_file":"wg-quick@home.service","state":"enabled","preset":"disabled"},
                {"unit_file":"wg-quick-work.service","state":"generated","preset":"ignored"}
            ]"#,
        );

        let units = list_wireguard_units(&runner).await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].wg_interface(), Some("home"));
        assert_eq!(units[0].state, UnitState::Enabled);
        assert_eq!(units[1].wg_interface(), Some("work"));
        assert_eq!(units[1].preset, UnitPreset::Ignored);
    }

    #[tokio::test]
    async fn test_list_propagates_command_failure() {
        let runner = MockRunner::new();
        runner.script_failure("systemctl", "Failed to connect to bus");

        let result = list_wireguard_units(&runner).await;
        assert!(matches!(result, Err(Error::Command { .. })));
    }

    #[tokio::test]
    async fn test_list_propagates_bad_json() {
        let runner = MockRunner::new();
        runner.script_stdout("systemctl", "not json");

        let result = list_wireguard_units(&runner).await;
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
