// Reachability probe
// One bounded ping against an address, cancellable and deadline-enforced

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ProbeError;

/// Options for one reachability probe
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Deadline for the whole probe, enforced independently of the tool's
    /// own per-attempt timeout
    pub timeout: Duration,
    /// Echo requests to send
    pub attempts: u32,
    /// Local interface to bind the probe to
    pub interface: Option<String>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            attempts: 3,
            interface: None,
        }
    }
}

/// A single bounded reachability test
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `address`, resolving with the mean reply latency in
    /// milliseconds. Cancelling `cancel` kills the underlying check and
    /// yields [`ProbeError::Cancelled`].
    async fn probe(
        &self,
        address: &str,
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> Result<f64, ProbeError>;
}

/// Probes by spawning the system `ping` binary
#[derive(Debug, Default)]
pub struct PingProber;

#[async_trait]
impl Prober for PingProber {
    async fn probe(
        &self,
        address: &str,
        options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> Result<f64, ProbeError> {
        let args = ping_args(address, options);
        debug!("Probing {} (ping {})", address, args.join(" "));

        let child = Command::new("ping")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the wait future kills the child, so both the cancel and
        // the deadline branch tear the process down.
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Probe of {} cancelled", address);
                Err(ProbeError::Cancelled)
            }
            result = tokio::time::timeout(options.timeout, child.wait_with_output()) => {
                match result {
                    Ok(Ok(output)) => parse_output(&output),
                    Ok(Err(e)) => Err(ProbeError::Io(e)),
                    Err(_) => Err(ProbeError::Timeout(options.timeout)),
                }
            }
        }
    }
}

/// Build the ping argument list: N attempts, a one-second per-attempt cap,
/// and an optional interface binding.
fn ping_args(address: &str, options: &ProbeOptions) -> Vec<String> {
    let mut args = vec![
        "-c".to_string(),
        options.attempts.to_string(),
        "-W".to_string(),
        "1".to_string(),
    ];
    if let Some(interface) = &options.interface {
        args.push("-I".to_string());
        args.push(interface.clone());
    }
    args.push(address.to_string());
    args
}

/// Extract a latency from finished ping output, regardless of exit status:
/// some ping variants exit non-zero when only part of the attempts got a
/// reply even though a usable average exists.
fn parse_output(output: &std::process::Output) -> Result<f64, ProbeError> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    if let Some(latency) = parse_latency_ms(&stdout) {
        return Ok(latency);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let diagnostic = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    Err(ProbeError::Unreachable { diagnostic })
}

/// Parse the mean latency in milliseconds from ping output.
///
/// Prefers the summary statistics line; falls back to the first
/// individual reply when no summary was printed.
fn parse_latency_ms(stdout: &str) -> Option<f64> {
    parse_summary_average(stdout).or_else(|| parse_first_reply(stdout))
}

/// `rtt min/avg/max/mdev = 10.7/11.1/11.5/0.4 ms` (iputils) or
/// `round-trip min/avg/max = 10.7/11.1/11.5 ms` (BSD/busybox)
fn parse_summary_average(stdout: &str) -> Option<f64> {
    let line = stdout.lines().find(|l| l.contains("min/avg/max"))?;
    let (_, values) = line.split_once('=')?;
    let avg = values.trim().split('/').nth(1)?;
    avg.parse().ok()
}

/// `64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=12.3 ms`
fn parse_first_reply(stdout: &str) -> Option<f64> {
    let line = stdout.lines().find(|l| l.contains("time="))?;
    let (_, rest) = line.split_once("time=")?;
    let value: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    value.parse().ok()
}
