use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::control::{Config, Signal};
use crate::error::AppResult;

use super::files;
use super::runner::TestRunner;
use super::AgentState;

/// One control connection. All handler output funnels through a single
/// writer task, so frames from overlapping handlers never interleave.
pub(super) async fn handle_control_socket(socket: WebSocket, state: Arc<AgentState>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Signal>();

    let writer = tokio::spawn(async move {
        while let Some(signal) = out_rx.recv().await {
            let text = match signal.encode() {
                Ok(text) => text,
                Err(err) => {
                    warn!("Failed to encode outbound signal: {}", err);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    if out_tx.send(Signal::greeting()).is_err() {
        return;
    }

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!("Error reading control socket: {}", err);
                break;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match Signal::decode(text.as_str()) {
            Ok(signal) => dispatch(signal, &state, &out_tx),
            Err(err) => debug!("Unable to parse signal: {}", err),
        }
    }

    drop(out_tx);
    if writer.await.is_err() {
        // Writer task panicked; the socket is gone either way.
    }
}

/// Handlers run as independent tasks and may overlap on one connection.
fn dispatch(signal: Signal, state: &Arc<AgentState>, out_tx: &mpsc::UnboundedSender<Signal>) {
    let state = Arc::clone(state);
    let out = out_tx.clone();
    match signal {
        Signal::RunTest { config } => {
            tokio::spawn(run_test(state, out, config));
        }
        Signal::ListenTest { test_id } => {
            tokio::spawn(listen_test(state, out, test_id));
        }
        Signal::ListTests { .. } => {
            tokio::spawn(async move {
                let result = list_tests(&state, &out).await;
                finish(&out, result);
            });
        }
        Signal::GetTest { test_id, .. } => {
            tokio::spawn(async move {
                let result = get_test(&state, &out, &test_id).await;
                finish(&out, result);
            });
        }
        Signal::DeleteTests { test_id } => {
            tokio::spawn(async move {
                let result = files::delete_tests(&state.base_path, &test_id).await;
                finish(&out, result);
            });
        }
        Signal::StopAllTests { test_id } => {
            tokio::spawn(async move {
                for runner in state.registry.matching(&test_id) {
                    runner.cancel("Client called StopAllTests");
                }
                finish(&out, Ok(()));
            });
        }
        Signal::Ping { .. } => {
            drop(out.send(Signal::Pong));
        }
        Signal::Exit => {
            warn!("Exit signal received, shutting down.");
            std::process::exit(1);
        }
        Signal::Pong | Signal::Stats { .. } | Signal::Done { .. } | Signal::Err { .. } => {}
    }
}

/// Report a handler outcome: an Err frame keeps the connection open, Done
/// tells the controller this operation produced its last frame.
fn finish(out: &mpsc::UnboundedSender<Signal>, result: AppResult<()>) {
    if let Err(err) = result {
        drop(out.send(Signal::error(err.to_string())));
    }
    drop(out.send(Signal::done()));
}

async fn run_test(state: Arc<AgentState>, out: mpsc::UnboundedSender<Signal>, config: Config) {
    let runner = match TestRunner::new(
        config,
        &state.bind_address,
        state.real_ip.as_deref(),
        state.base_path.clone(),
        Arc::clone(&state.system),
    ) {
        Ok(runner) => runner,
        Err(err) => {
            finish(&out, Err(err));
            return;
        }
    };
    if let Err(err) = state.registry.insert(Arc::clone(&runner)) {
        finish(&out, Err(err));
        return;
    }

    runner.attach_subscriber(out.clone());
    let result = runner.run().await;
    state.registry.remove(runner.id());
    if let Err(err) = result {
        // The runner broadcast its own Done; only failures need a frame.
        drop(out.send(Signal::error(err.to_string())));
        drop(out.send(Signal::done()));
    }
}

/// Attach to live tests. A finished or unknown test answers with an
/// immediate Done instead of waiting for points that will never come.
async fn listen_test(state: Arc<AgentState>, out: mpsc::UnboundedSender<Signal>, test_id: String) {
    let mut attached = 0;
    for runner in state.registry.matching(&test_id) {
        if runner.attach_subscriber(out.clone()) {
            attached += 1;
        }
    }
    debug!("Listen attached to {} running test(s)", attached);
    if attached == 0 {
        drop(out.send(Signal::done()));
    }
}

async fn list_tests(state: &AgentState, out: &mpsc::UnboundedSender<Signal>) -> AppResult<()> {
    let tests = files::list_tests(&state.base_path).await?;
    drop(out.send(Signal::ListTests { tests }));
    Ok(())
}

async fn get_test(
    state: &AgentState,
    out: &mpsc::UnboundedSender<Signal>,
    test_id: &str,
) -> AppResult<()> {
    for path in files::test_files_sorted(&state.base_path, test_id).await? {
        let file = tokio::fs::File::open(&path).await?;
        let mut lines = tokio::io::BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            let frame = Signal::GetTest {
                test_id: test_id.to_owned(),
                data: line,
            };
            if out.send(frame).is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}
