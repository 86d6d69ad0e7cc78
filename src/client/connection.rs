use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error};

use crate::control::{
    join_host_port, Config, DataPoint, FilePrefix, Signal, SignalCode, TError, TestInfo,
};
use crate::error::{AppError, AppResult, ControlError};

use super::table;

const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Everything the per-host sessions feed back to the command in progress.
#[derive(Default)]
pub(super) struct SharedState {
    fresh_points: Mutex<Vec<DataPoint>>,
    archived_points: Mutex<Vec<DataPoint>>,
    fresh_errors: Mutex<Vec<TError>>,
    archived_errors: Mutex<Vec<TError>>,
    tests: Mutex<HashMap<String, TestInfo>>,
    error_total: AtomicU64,
    hosts_doing_work: AtomicI64,
}

impl SharedState {
    pub(super) fn record_stats(&self, mut points: Vec<DataPoint>, errors: Vec<TError>) {
        let received = Utc::now();
        for point in &mut points {
            point.received = Some(received);
        }
        self.error_total
            .fetch_add(errors.len() as u64, Ordering::Relaxed);
        lock_unpoisoned(&self.fresh_points).extend(points);
        lock_unpoisoned(&self.fresh_errors).extend(errors);
    }

    /// Parse one prefix-tagged result line received through GetTest.
    pub(super) fn record_line(&self, line: &str) -> Result<(), ControlError> {
        let bytes = line.as_bytes();
        let Some((&prefix, body)) = bytes.split_first() else {
            return Ok(());
        };
        let body = std::str::from_utf8(body).unwrap_or_default();
        match FilePrefix::from_byte(prefix) {
            Some(FilePrefix::DataPoint) => {
                let mut point: DataPoint =
                    serde_json::from_str(body).map_err(|err| ControlError::Decode {
                        context: "result line",
                        source: err,
                    })?;
                point.received = Some(Utc::now());
                lock_unpoisoned(&self.fresh_points).push(point);
                Ok(())
            }
            Some(FilePrefix::Error) => {
                let error: TError =
                    serde_json::from_str(body).map_err(|err| ControlError::Decode {
                        context: "result line",
                        source: err,
                    })?;
                lock_unpoisoned(&self.fresh_errors).push(error);
                Ok(())
            }
            None => Err(ControlError::UnknownPrefix { prefix }),
        }
    }

    fn merge_tests(&self, list: Vec<TestInfo>) {
        let mut tests = lock_unpoisoned(&self.tests);
        for info in list {
            tests.entry(info.id.clone()).or_insert(info);
        }
    }

    /// New points since the last drain; drained points move to the archive.
    pub(super) fn drain_points(&self) -> Vec<DataPoint> {
        let drained = std::mem::take(&mut *lock_unpoisoned(&self.fresh_points));
        lock_unpoisoned(&self.archived_points).extend(drained.iter().cloned());
        drained
    }

    pub(super) fn drain_errors(&self) -> Vec<TError> {
        let drained = std::mem::take(&mut *lock_unpoisoned(&self.fresh_errors));
        lock_unpoisoned(&self.archived_errors).extend(drained.iter().cloned());
        drained
    }

    pub(super) fn all_points(&self) -> Vec<DataPoint> {
        self.drain_points();
        lock_unpoisoned(&self.archived_points).clone()
    }

    pub(super) fn all_errors(&self) -> Vec<TError> {
        self.drain_errors();
        lock_unpoisoned(&self.archived_errors).clone()
    }

    pub(super) fn test_list(&self) -> Vec<TestInfo> {
        lock_unpoisoned(&self.tests).values().cloned().collect()
    }

    pub(super) fn error_total(&self) -> u64 {
        self.error_total.load(Ordering::Relaxed)
    }

    pub(super) fn hosts_doing_work(&self) -> i64 {
        self.hosts_doing_work.load(Ordering::Relaxed)
    }
}

fn lock_unpoisoned<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Open one control channel per host in parallel and send every host the
/// command frame. Fails fast unless every handshake lands inside the
/// ten-second window.
pub(super) async fn fan_out(
    config: &Config,
    command: Signal,
    shared: Arc<SharedState>,
    cancel: watch::Receiver<bool>,
) -> AppResult<()> {
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<()>();
    for host in &config.hosts {
        tokio::spawn(host_session(
            config.clone(),
            host.clone(),
            command.clone(),
            Arc::clone(&shared),
            ready_tx.clone(),
            cancel.clone(),
        ));
    }
    drop(ready_tx);

    let expected = config.hosts.len();
    let mut ready = 0;
    let deadline = tokio::time::sleep(HANDSHAKE_DEADLINE);
    tokio::pin!(deadline);
    while ready < expected {
        tokio::select! {
            () = &mut deadline => {
                return Err(AppError::control(ControlError::HandshakeTimeout {
                    expected,
                    actual: ready,
                }));
            }
            message = ready_rx.recv() => match message {
                Some(()) => ready += 1,
                None => {
                    return Err(AppError::control(ControlError::HandshakeTimeout {
                        expected,
                        actual: ready,
                    }));
                }
            }
        }
    }
    Ok(())
}

async fn host_session(
    config: Config,
    host: String,
    command: Signal,
    shared: Arc<SharedState>,
    ready_tx: mpsc::UnboundedSender<()>,
    cancel: watch::Receiver<bool>,
) {
    let mut handshaken = false;
    loop {
        let result = run_session(
            &config,
            &host,
            &command,
            &shared,
            &ready_tx,
            &mut handshaken,
            cancel.clone(),
        )
        .await;
        match result {
            Ok(()) => break,
            Err(err) => {
                error!("{}: {}", host, err);
                if config.restart_on_error && !*cancel.borrow() {
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
                break;
            }
        }
    }
    if handshaken {
        shared.hosts_doing_work.fetch_sub(1, Ordering::Relaxed);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    config: &Config,
    host: &str,
    command: &Signal,
    shared: &SharedState,
    ready_tx: &mpsc::UnboundedSender<()>,
    handshaken: &mut bool,
    mut cancel: watch::Receiver<bool>,
) -> AppResult<()> {
    let addr = join_host_port(host, config.port);
    let (_, ws_scheme) = config.schemes();
    let url = format!("{}://{}/ws/{}", ws_scheme, addr, host);
    debug!("Connecting to {}", url);

    let connect = tokio::time::timeout(config.dial_timeout(), connect_async(url.as_str()))
        .await
        .map_err(|_| {
            AppError::control(ControlError::ConnectionClosed {
                host: host.to_owned(),
            })
        })?;
    let (socket, _) = connect.map_err(|err| {
        AppError::control(ControlError::Connect {
            addr: addr.clone(),
            source: err,
        })
    })?;
    let (mut sink, mut stream) = socket.split();

    // The agent speaks first; exactly one Ping/OK frame opens the channel.
    let greeting = read_signal(&mut stream, host).await?;
    match greeting {
        Signal::Ping {
            code: SignalCode::Ok,
        } => {}
        Signal::Ping { code } => {
            return Err(AppError::control(ControlError::HandshakeRejected {
                host: host.to_owned(),
                code,
            }));
        }
        _ => {
            return Err(AppError::control(ControlError::UnexpectedGreeting {
                host: host.to_owned(),
            }));
        }
    }
    debug!("Connected to {}", addr);
    if !*handshaken {
        *handshaken = true;
        shared.hosts_doing_work.fetch_add(1, Ordering::Relaxed);
        drop(ready_tx.send(()));
    }

    sink.send(Message::Text(command.encode()?)).await?;

    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return Ok(());
                }
            }
            message = stream.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        return Err(AppError::control(ControlError::ConnectionClosed {
                            host: host.to_owned(),
                        }));
                    }
                };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => {
                        return Err(AppError::control(ControlError::ConnectionClosed {
                            host: host.to_owned(),
                        }));
                    }
                    _ => continue,
                };
                match Signal::decode(&text)? {
                    Signal::Stats { points, errors } => shared.record_stats(points, errors),
                    Signal::ListTests { tests } => shared.merge_tests(tests),
                    Signal::GetTest { data, .. } => {
                        if let Err(err) = shared.record_line(&data) {
                            debug!("Skipping result line from {}: {}", host, err);
                        }
                    }
                    Signal::Err { created, error } => table::print_remote_error(created, &error),
                    Signal::Done { .. } => {
                        debug!("Host finished: {}", addr);
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn read_signal<S>(stream: &mut S, host: &str) -> AppResult<Signal>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = stream
            .next()
            .await
            .ok_or_else(|| {
                AppError::control(ControlError::ConnectionClosed {
                    host: host.to_owned(),
                })
            })?
            .map_err(AppError::from)?;
        match message {
            Message::Text(text) => return Ok(Signal::decode(&text)?),
            Message::Close(_) => {
                return Err(AppError::control(ControlError::ConnectionClosed {
                    host: host.to_owned(),
                }));
            }
            _ => continue,
        }
    }
}
