// Shared test doubles for the monitor's process, probe, and network seams

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ProbeError, Result};
use crate::netstack::{LinkHandle, NetworkStack};
use crate::probe::{ProbeOptions, Prober};
use crate::runner::{CommandOutput, CommandRunner};
use crate::types::{UnitDescriptor, UnitPreset, UnitState};

pub(crate) fn link(index: u32, ifname: &str) -> LinkHandle {
    LinkHandle {
        index,
        ifname: ifname.to_string(),
    }
}

pub(crate) fn wg_unit(name: &str) -> UnitDescriptor {
    UnitDescriptor {
        unit_file: format!("wg-quick@{name}.service"),
        state: UnitState::Enabled,
        preset: UnitPreset::Disabled,
    }
}

/// Command runner with per-program scripted responses. Programs without a
/// script succeed with empty output. An optional delay makes invocations
/// observable mid-flight under paused test time.
pub(crate) struct MockRunner {
    responses: Mutex<HashMap<String, VecDeque<Result<CommandOutput>>>>,
    calls: Mutex<Vec<Vec<String>>>,
    delay: Mutex<Duration>,
}

impl MockRunner {
    pub(crate) fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub(crate) fn script_stdout(&self, program: &str, stdout: &str) {
        self.push_response(
            program,
            Ok(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
    }

    pub(crate) fn script_failure(&self, program: &str, stderr: &str) {
        use std::os::unix::process::ExitStatusExt;
        self.push_response(
            program,
            Err(Error::Command {
                name: program.to_string(),
                status: std::process::ExitStatus::from_raw(256),
                stderr: stderr.to_string(),
            }),
        );
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Every invocation so far, program first
    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_for(&self, program: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|argv| argv[0] == program)
            .count()
    }

    fn push_response(&self, program: &str, response: Result<CommandOutput>) {
        self.responses
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .push_back(response);
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let mut argv = vec![program.to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        self.calls.lock().unwrap().push(argv);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .responses
            .lock()
            .unwrap()
            .get_mut(program)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(response) => response,
            None => Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}

/// Prober with a scripted result queue and concurrency accounting. When the
/// queue runs dry it reports success with a 1 ms latency, so cadence tests
/// can run open-ended.
pub(crate) struct MockProber {
    results: Mutex<VecDeque<std::result::Result<f64, ProbeError>>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    cancelled: AtomicUsize,
}

impl MockProber {
    pub(crate) fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            delay: Mutex::new(Duration::from_millis(10)),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub(crate) fn script(&self, result: std::result::Result<f64, ProbeError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub(crate) fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe(
        &self,
        _address: &str,
        _options: &ProbeOptions,
        cancel: &CancellationToken,
    ) -> std::result::Result<f64, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(ProbeError::Cancelled)
            }
            () = tokio::time::sleep(delay) => {
                self.results.lock().unwrap().pop_front().unwrap_or(Ok(1.0))
            }
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Network stack backed by in-memory link and address tables
pub(crate) struct MockNetworkStack {
    links: Mutex<Vec<LinkHandle>>,
    ip_config: Mutex<HashMap<String, bool>>,
    fail_links: Mutex<bool>,
    generation: watch::Sender<u64>,
}

impl MockNetworkStack {
    pub(crate) fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            links: Mutex::new(Vec::new()),
            ip_config: Mutex::new(HashMap::new()),
            fail_links: Mutex::new(false),
            generation,
        }
    }

    /// Replace the link table and publish a link-change event
    pub(crate) fn set_links(&self, links: Vec<LinkHandle>) {
        *self.links.lock().unwrap() = links;
        self.generation.send_modify(|g| *g += 1);
    }

    pub(crate) fn set_ip_config(&self, ifname: &str, configured: bool) {
        self.ip_config
            .lock()
            .unwrap()
            .insert(ifname.to_string(), configured);
    }

    /// Make the next `active_links` call fail
    pub(crate) fn fail_next_links(&self) {
        *self.fail_links.lock().unwrap() = true;
    }
}

#[async_trait]
impl NetworkStack for MockNetworkStack {
    async fn active_links(&self) -> Result<Vec<LinkHandle>> {
        let mut fail = self.fail_links.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "link enumeration failed",
            )));
        }
        Ok(self.links.lock().unwrap().clone())
    }

    async fn has_ip_config(&self, ifname: &str) -> bool {
        self.ip_config
            .lock()
            .unwrap()
            .get(ifname)
            .copied()
            .unwrap_or(false)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}
