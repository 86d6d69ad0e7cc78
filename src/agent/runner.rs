use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::control::{join_host_port, Config, FilePrefix, Signal, TError};
use crate::error::{AppError, AppResult, ConfigError, RunnerError};

use super::files;
use super::peer::PeerReader;
use super::stats::SystemStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RunnerState {
    Creating,
    Running,
    Draining,
    Done,
}

/// Test errors, deduplicated per sample interval by a caller-supplied key,
/// next to the cumulative counter stamped onto data points.
pub(super) struct ErrorLog {
    entries: Mutex<(Vec<TError>, HashSet<String>)>,
    total: AtomicU64,
}

impl ErrorLog {
    pub(super) fn new() -> Self {
        ErrorLog {
            entries: Mutex::new((Vec::new(), HashSet::new())),
            total: AtomicU64::new(0),
        }
    }

    pub(super) fn record(&self, error: String, key: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut guard = lock_unpoisoned(&self.entries);
        if guard.1.insert(key.to_owned()) {
            guard.0.push(TError {
                created: Utc::now(),
                error,
            });
        }
    }

    pub(super) fn drain(&self) -> Vec<TError> {
        let mut guard = lock_unpoisoned(&self.entries);
        guard.1.clear();
        std::mem::take(&mut guard.0)
    }

    pub(super) fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// The process-wide set of live test runners.
#[derive(Default)]
pub(super) struct Registry {
    tests: Mutex<HashMap<String, Arc<TestRunner>>>,
}

impl Registry {
    pub(super) fn insert(&self, runner: Arc<TestRunner>) -> AppResult<()> {
        let mut tests = lock_unpoisoned(&self.tests);
        if tests.contains_key(runner.id()) {
            return Err(AppError::runner(RunnerError::DuplicateTest {
                id: runner.id().to_owned(),
            }));
        }
        tests.insert(runner.id().to_owned(), runner);
        Ok(())
    }

    pub(super) fn remove(&self, test_id: &str) {
        lock_unpoisoned(&self.tests).remove(test_id);
    }

    /// Runners matching a test id; an empty id selects every live runner.
    pub(super) fn matching(&self, test_id: &str) -> Vec<Arc<TestRunner>> {
        lock_unpoisoned(&self.tests)
            .values()
            .filter(|runner| test_id.is_empty() || runner.id() == test_id)
            .cloned()
            .collect()
    }
}

/// Owner of one test's entire execution on this agent.
pub(super) struct TestRunner {
    config: Config,
    local: String,
    base_path: PathBuf,
    cancel_tx: watch::Sender<bool>,
    readers: Vec<Arc<PeerReader>>,
    state: Mutex<RunnerState>,
    subscribers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Signal>>>,
    errors: Arc<ErrorLog>,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
    system: Arc<SystemStats>,
}

impl TestRunner {
    /// Build the runner and its peer readers. Hosts matching the agent's own
    /// bind address, or containing the configured real IP, are skipped; a
    /// config whose every host is excluded never starts.
    pub(super) fn new(
        config: Config,
        bind_address: &str,
        real_ip: Option<&str>,
        base_path: PathBuf,
        system: Arc<SystemStats>,
    ) -> AppResult<Arc<Self>> {
        let real_ip = real_ip.filter(|ip| !ip.is_empty());
        let mut readers = Vec::new();
        for host in &config.hosts {
            let addr = join_host_port(host, config.port);
            if addr == bind_address {
                continue;
            }
            if real_ip.is_some_and(|ip| addr.contains(ip)) {
                continue;
            }
            readers.push(PeerReader::new(&config, host)?);
        }
        if readers.is_empty() {
            return Err(AppError::config(ConfigError::NoPeers));
        }

        let local = real_ip
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| bind_address.to_owned());
        let (cancel_tx, _) = watch::channel(false);

        Ok(Arc::new(TestRunner {
            config,
            local,
            base_path,
            cancel_tx,
            readers,
            state: Mutex::new(RunnerState::Creating),
            subscribers: Mutex::new(HashMap::new()),
            errors: Arc::new(ErrorLog::new()),
            file: tokio::sync::Mutex::new(None),
            system,
        }))
    }

    pub(super) fn id(&self) -> &str {
        &self.config.test_id
    }

    #[cfg(test)]
    pub(super) fn peer_count(&self) -> usize {
        self.readers.len()
    }

    pub(super) fn state(&self) -> RunnerState {
        *lock_unpoisoned(&self.state)
    }

    fn set_state(&self, state: RunnerState) {
        *lock_unpoisoned(&self.state) = state;
    }

    pub(super) fn cancel(&self, reason: &str) {
        debug!("Cancelling test {}: {}", self.config.test_id, reason);
        drop(self.cancel_tx.send(true));
    }

    pub(super) fn add_error(&self, error: String, key: &str) {
        self.errors.record(error, key);
    }

    /// Register a control connection for telemetry. Returns false when the
    /// runner is already Done, in which case the caller answers with an
    /// immediate Done frame instead.
    pub(super) fn attach_subscriber(&self, tx: mpsc::UnboundedSender<Signal>) -> bool {
        if self.state() == RunnerState::Done {
            return false;
        }
        lock_unpoisoned(&self.subscribers).insert(Uuid::new_v4(), tx);
        true
    }

    /// Drive the test to completion: spawn the dispatchers, sample once per
    /// second, drain, close the result file, notify subscribers.
    pub(super) async fn run(&self) -> AppResult<()> {
        self.set_state(RunnerState::Running);
        let started = Instant::now();
        for reader in &self.readers {
            Arc::clone(reader).start(Arc::clone(&self.errors), self.cancel_tx.subscribe());
        }

        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample_and_publish().await;
                    if started.elapsed() >= self.config.duration() {
                        break;
                    }
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.set_state(RunnerState::Draining);
        drop(self.cancel_tx.send(true));
        self.sample_and_publish().await;
        if let Some(mut file) = self.file.lock().await.take() {
            use tokio::io::AsyncWriteExt;
            if let Err(err) = file.flush().await {
                warn!("Failed to flush result file for {}: {}", self.id(), err);
            }
        }
        self.set_state(RunnerState::Done);
        self.broadcast(Signal::done());
        lock_unpoisoned(&self.subscribers).clear();
        debug!("Test {} finished", self.id());
        Ok(())
    }

    async fn sample_and_publish(&self) {
        let system = self.system.snapshot();
        let err_count = self.errors.total();
        let points: Vec<_> = self
            .readers
            .iter()
            .filter_map(|reader| reader.sample(&self.local, err_count, system))
            .collect();
        let errors = self.errors.drain();

        if self.config.save && (!points.is_empty() || !errors.is_empty()) {
            if let Err(err) = self.save_records(&points, &errors).await {
                self.add_error(format!("Result file write failed: {}", err), "result-file");
            }
        }

        if points.is_empty() && errors.is_empty() {
            return;
        }
        self.broadcast(Signal::Stats { points, errors });
    }

    async fn save_records(
        &self,
        points: &[crate::control::DataPoint],
        errors: &[TError],
    ) -> AppResult<()> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let index = files::next_file_index(&self.base_path, self.id()).await?;
            let file = files::create_test_file(&self.base_path, self.id(), index)
                .await
                .map_err(|err| {
                    AppError::runner(RunnerError::ResultFile {
                        id: self.id().to_owned(),
                        source: err,
                    })
                })?;
            *guard = Some(file);
        }
        let file = guard
            .as_mut()
            .ok_or_else(|| AppError::runner(RunnerError::ResultFile {
                id: self.id().to_owned(),
                source: std::io::Error::other("result file disappeared"),
            }))?;

        for point in points {
            let body = serde_json::to_vec(point)?;
            files::write_record(file, FilePrefix::DataPoint, &body).await?;
        }
        for error in errors {
            let body = serde_json::to_vec(error)?;
            files::write_record(file, FilePrefix::Error, &body).await?;
        }
        Ok(())
    }

    /// Send one frame to every subscriber; a failed send drops that
    /// subscriber. Channels are unbounded, so the sampler never waits.
    fn broadcast(&self, signal: Signal) {
        let mut subscribers = lock_unpoisoned(&self.subscribers);
        subscribers.retain(|id, tx| {
            let alive = tx.send(signal.clone()).is_ok();
            if !alive {
                debug!("Dropping subscriber {}", id);
            }
            alive
        });
    }
}

fn lock_unpoisoned<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
