use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use rand::RngCore;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::control::{join_host_port, Config, DataPoint, TestKind, LOW_SENTINEL};
use crate::error::AppResult;

use super::probe;
use super::runner::ErrorLog;
use super::stats::SystemSnapshot;

const POOL_MAX_IDLE_PER_HOST: usize = 1024;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(15);
const TCP_KEEPALIVE: Duration = Duration::from_secs(15);

/// High/low accumulators for the current sample interval.
#[derive(Debug)]
pub(super) struct Window {
    pub rms_high: i64,
    pub rms_low: i64,
    pub ttfb_high: i64,
    pub ttfb_low: i64,
    pub has_stats: bool,
}

impl Window {
    fn new() -> Self {
        Window {
            rms_high: 0,
            rms_low: LOW_SENTINEL,
            ttfb_high: 0,
            ttfb_low: LOW_SENTINEL,
            has_stats: false,
        }
    }

    fn reset(&mut self) {
        *self = Window::new();
    }
}

/// Per-(local, remote) probe dispatcher and accumulator state.
pub(super) struct PeerReader {
    pub(super) addr: String,
    pub(super) test_id: String,
    pub(super) kind: TestKind,
    pub(super) insecure: bool,
    pub(super) request_delay: Duration,
    pub(super) dial_timeout: Duration,
    pub(super) client: reqwest::Client,
    /// Pre-randomised payload, sliced into BufferBytes-sized chunks.
    pub(super) chunks: Arc<Vec<Bytes>>,
    tx: AtomicU64,
    tx_count: AtomicU64,
    window: Mutex<Window>,
    last_sample: Mutex<Instant>,
    permits: Arc<Semaphore>,
}

impl PeerReader {
    pub(super) fn new(config: &Config, host: &str) -> AppResult<Arc<Self>> {
        let mut payload = vec![0u8; config.payload_bytes.max(1)];
        rand::thread_rng().fill_bytes(&mut payload);
        let chunk_size = config.buffer_bytes.clamp(1, payload.len());
        let chunks: Vec<Bytes> = payload
            .chunks(chunk_size)
            .map(Bytes::copy_from_slice)
            .collect();

        Ok(Arc::new(PeerReader {
            addr: join_host_port(host, config.port),
            test_id: config.test_id.clone(),
            kind: config.kind,
            insecure: config.insecure,
            request_delay: config.request_delay(),
            dial_timeout: config.dial_timeout(),
            client: build_client(config)?,
            chunks: Arc::new(chunks),
            tx: AtomicU64::new(0),
            tx_count: AtomicU64::new(0),
            window: Mutex::new(Window::new()),
            last_sample: Mutex::new(Instant::now()),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
        }))
    }

    /// Launch the probe-dispatch loop. One token per in-flight probe; tokens
    /// return when the probe finishes. Cancellation exits the loop without
    /// waiting for outstanding tokens.
    pub(super) fn start(self: Arc<Self>, errors: Arc<ErrorLog>, cancel: watch::Receiver<bool>) {
        let reader = self;
        tokio::spawn(async move {
            let mut cancel_rx = cancel.clone();
            loop {
                if *cancel_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                    permit = Arc::clone(&reader.permits).acquire_owned() => {
                        let Ok(permit) = permit else { break };
                        let reader = Arc::clone(&reader);
                        let errors = Arc::clone(&errors);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            probe::run_probe(&reader, &errors, &cancel).await;
                            drop(permit);
                        });
                    }
                }
            }
            debug!("Dispatch loop for {} exited", reader.addr);
        });
    }

    /// Count bytes handed to the transport. Also marks the interval active,
    /// so long-lived streams keep emitting points between completions.
    pub(super) fn add_tx(&self, bytes: u64) {
        self.tx.fetch_add(bytes, Ordering::Relaxed);
        lock_unpoisoned(&self.window).has_stats = true;
    }

    pub(super) fn mark_issued(&self) {
        self.tx_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_ttfb(&self, micros: i64) {
        let mut window = lock_unpoisoned(&self.window);
        window.ttfb_high = window.ttfb_high.max(micros);
        window.ttfb_low = window.ttfb_low.min(micros);
        window.has_stats = true;
    }

    pub(super) fn record_round_trip(&self, micros: i64) {
        let mut window = lock_unpoisoned(&self.window);
        window.rms_high = window.rms_high.max(micros);
        window.rms_low = window.rms_low.min(micros);
        window.has_stats = true;
    }

    /// Snapshot the accumulators into a data point and reset the interval
    /// fields. Returns None when no probe touched this peer since the last
    /// sample, so idle peers emit nothing instead of a healthy-looking zero.
    pub(super) fn sample(
        &self,
        local: &str,
        err_count: u64,
        system: SystemSnapshot,
    ) -> Option<DataPoint> {
        let window = {
            let mut window = lock_unpoisoned(&self.window);
            if !window.has_stats {
                return None;
            }
            let snapshot = Window {
                rms_high: window.rms_high,
                rms_low: window.rms_low,
                ttfb_high: window.ttfb_high,
                ttfb_low: window.ttfb_low,
                has_stats: true,
            };
            window.reset();
            snapshot
        };

        let now = Instant::now();
        let elapsed_secs = {
            let mut last = lock_unpoisoned(&self.last_sample);
            let elapsed = now.duration_since(*last);
            *last = now;
            // The sampler may drift; never divide by a zero interval.
            elapsed.as_secs_f64().max(0.001)
        };
        let interval_bytes = self.tx.swap(0, Ordering::Relaxed);
        let rate = interval_bytes as f64 / elapsed_secs;

        Some(DataPoint {
            created: Utc::now(),
            local: local.to_owned(),
            remote: self.addr.clone(),
            test_id: self.test_id.clone(),
            kind: self.kind,
            rms_high: window.rms_high,
            rms_low: window.rms_low,
            ttfb_high: window.ttfb_high,
            ttfb_low: window.ttfb_low,
            tx_rate: rate as u64,
            tx_total: interval_bytes,
            tx_count: self.tx_count.load(Ordering::Relaxed),
            err_count,
            dropped_packets: system.dropped_packets,
            memory_used_percent: system.memory_used_percent,
            cpu_used_percent: system.cpu_used_percent,
            received: None,
        })
    }

    #[cfg(test)]
    pub(super) fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

fn lock_unpoisoned<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn build_client(config: &Config) -> AppResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .tcp_nodelay(true)
        .tcp_keepalive(TCP_KEEPALIVE)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .connect_timeout(config.dial_timeout())
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .build()?;
    Ok(client)
}
