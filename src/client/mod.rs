mod analyze;
mod connection;
mod csv;
mod rollup;
mod table;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::control::{Config, DataPoint, FilePrefix, Signal, TError};
use crate::error::{AppError, AppResult, ConfigError, ControlError};

use connection::{fan_out, SharedState};

const KEEP_ALIVE_GRACE: Duration = Duration::from_secs(20);

/// Everything a finished command collected from the fleet.
pub struct RunOutcome {
    pub points: Vec<DataPoint>,
    pub errors: Vec<TError>,
}

/// Command every host to run the test, stream the rollup while it runs and
/// return the collected points.
pub async fn run_test(config: Config, cancel: watch::Receiver<bool>) -> AppResult<RunOutcome> {
    let shared = Arc::new(SharedState::default());
    let command = Signal::RunTest {
        config: config.clone(),
    };
    fan_out(&config, command, Arc::clone(&shared), cancel.clone()).await?;
    stream_rollup(&shared, &config, &cancel).await?;
    Ok(RunOutcome {
        points: shared.all_points(),
        errors: shared.all_errors(),
    })
}

/// Attach to tests already running on the fleet and stream their rollup.
pub async fn listen(config: Config, cancel: watch::Receiver<bool>) -> AppResult<RunOutcome> {
    let shared = Arc::new(SharedState::default());
    let command = Signal::ListenTest {
        test_id: config.test_id.clone(),
    };
    fan_out(&config, command, Arc::clone(&shared), cancel.clone()).await?;
    stream_rollup(&shared, &config, &cancel).await?;
    Ok(RunOutcome {
        points: shared.all_points(),
        errors: shared.all_errors(),
    })
}

pub async fn stop(config: Config, cancel: watch::Receiver<bool>) -> AppResult<()> {
    let shared = Arc::new(SharedState::default());
    let command = Signal::StopAllTests {
        test_id: config.test_id.clone(),
    };
    fan_out(&config, command, Arc::clone(&shared), cancel.clone()).await?;
    keep_alive(&shared, &config, &cancel, None).await
}

pub async fn list_tests(config: Config, cancel: watch::Receiver<bool>) -> AppResult<()> {
    let shared = Arc::new(SharedState::default());
    let command = Signal::ListTests { tests: Vec::new() };
    fan_out(&config, command, Arc::clone(&shared), cancel.clone()).await?;
    keep_alive(&shared, &config, &cancel, None).await?;
    table::print_test_list(shared.test_list());
    Ok(())
}

pub async fn delete_tests(config: Config, cancel: watch::Receiver<bool>) -> AppResult<()> {
    let shared = Arc::new(SharedState::default());
    let command = Signal::DeleteTests {
        test_id: config.test_id.clone(),
    };
    fan_out(&config, command, Arc::clone(&shared), cancel.clone()).await?;
    keep_alive(&shared, &config, &cancel, None).await
}

/// Fetch a test's result lines from every host and write one merged,
/// time-ordered result file locally.
pub async fn download(config: Config, cancel: watch::Receiver<bool>) -> AppResult<()> {
    let path = config
        .file
        .clone()
        .ok_or(ConfigError::MissingFile {
            command: "download",
        })?;
    let shared = Arc::new(SharedState::default());
    let command = Signal::GetTest {
        test_id: config.test_id.clone(),
        data: String::new(),
    };
    fan_out(&config, command, Arc::clone(&shared), cancel.clone()).await?;
    if let Err(err) = keep_alive(&shared, &config, &cancel, None).await {
        warn!("Download keep-alive ended early: {}", err);
    }

    let mut points = shared.all_points();
    let mut errors = shared.all_errors();
    points.sort_by_key(|point| point.created);
    errors.sort_by_key(|error| error.created);

    let mut file = tokio::fs::File::create(&path).await?;
    for point in &points {
        write_prefixed(&mut file, FilePrefix::DataPoint, &serde_json::to_vec(point)?).await?;
    }
    for error in &errors {
        write_prefixed(&mut file, FilePrefix::Error, &serde_json::to_vec(error)?).await?;
    }
    file.flush().await?;
    info!(
        "Saved {} data points and {} errors to {}",
        points.len(),
        errors.len(),
        path
    );
    Ok(())
}

/// Offline analysis of a downloaded result file.
pub async fn analyze_file(config: Config) -> AppResult<()> {
    let path = config.file.clone().ok_or(ConfigError::MissingFile {
        command: "analyze",
    })?;
    let (points, errors) = read_result_file(&path).await?;
    let mut outcome = RunOutcome { points, errors };
    print_points_and_errors(&outcome, &config);
    print_bracket_analysis(&mut outcome, &config);
    Ok(())
}

pub async fn export_csv(config: Config) -> AppResult<()> {
    let path = config.file.clone().ok_or(ConfigError::MissingFile {
        command: "csv",
    })?;
    let output = csv::export(&path).await?;
    info!("Wrote {}", output.display());
    Ok(())
}

/// Optional per-point dump after a command finished.
pub fn print_points_and_errors(outcome: &RunOutcome, config: &Config) {
    if config.print_full && !outcome.points.is_empty() {
        table::print_data_point_header(outcome.points[0].kind);
        for point in &outcome.points {
            if let Some(host) = config.host_filter.as_deref() {
                if !point.local.contains(host) && !point.remote.contains(host) {
                    continue;
                }
            }
            table::print_data_point_row(point);
        }
    }
    if config.print_errors {
        for error in &outcome.errors {
            table::print_terror(error);
        }
    }
}

/// Bracketed tail analysis over everything the command collected.
pub fn print_bracket_analysis(outcome: &mut RunOutcome, config: &Config) {
    let mut points = std::mem::take(&mut outcome.points);
    if let Some(host) = config.host_filter.as_deref() {
        points = analyze::filter_by_host(points, host);
    }
    let analysis = analyze::analyze_points(&mut points, config.sort);
    tracing::debug!("Bracketed {} data points", analysis.total_count());
    table::print_analysis(&analysis);
    outcome.points = points;
}

async fn stream_rollup(
    shared: &Arc<SharedState>,
    config: &Config,
    cancel: &watch::Receiver<bool>,
) -> AppResult<()> {
    let mut printer = rollup::RollupPrinter::new(config.kind);
    let shared_tick = Arc::clone(shared);
    let mut on_tick = move || {
        for error in shared_tick.drain_errors() {
            table::print_terror(&error);
        }
        let points = shared_tick.drain_points();
        if let Some(output) = rollup::reduce(&points, shared_tick.error_total()) {
            printer.print(&output);
        }
        false
    };
    keep_alive(shared, config, cancel, Some(&mut on_tick)).await
}

/// Wait for the fleet to finish: returns when every host reported Done, the
/// tick callback asks to stop, or the bounded wait expires.
async fn keep_alive(
    shared: &SharedState,
    config: &Config,
    cancel: &watch::Receiver<bool>,
    mut on_tick: Option<&mut dyn FnMut() -> bool>,
) -> AppResult<()> {
    let started = Instant::now();
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if *cancel.borrow() {
            return Ok(());
        }
        if started.elapsed() > config.duration() + KEEP_ALIVE_GRACE {
            return Err(AppError::control(ControlError::KeepAliveExpired));
        }
        if let Some(tick) = on_tick.as_mut() {
            if tick() {
                return Ok(());
            }
        }
        if shared.hosts_doing_work() <= 0 {
            return Ok(());
        }
    }
}

async fn write_prefixed(
    file: &mut tokio::fs::File,
    prefix: FilePrefix,
    body: &[u8],
) -> AppResult<()> {
    file.write_all(&[prefix.byte()]).await?;
    file.write_all(body).await?;
    file.write_all(b"\n").await?;
    Ok(())
}

async fn read_result_file(path: &str) -> AppResult<(Vec<DataPoint>, Vec<TError>)> {
    use tokio::io::AsyncBufReadExt;

    let file = tokio::fs::File::open(path).await?;
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut points = Vec::new();
    let mut errors = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let Some((&prefix, body)) = line.as_bytes().split_first() else {
            continue;
        };
        match FilePrefix::from_byte(prefix) {
            Some(FilePrefix::DataPoint) => points.push(serde_json::from_slice(body)?),
            Some(FilePrefix::Error) => errors.push(serde_json::from_slice(body)?),
            None => {
                return Err(AppError::control(ControlError::UnknownPrefix { prefix }));
            }
        }
    }
    Ok((points, errors))
}
