use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;

use crate::control::tests::{sample_config, sample_point};
use crate::control::{Config, SortKey, TestKind, LOW_SENTINEL};
use crate::error::{AppError, AppResult, ControlError};

use super::analyze::analyze_points;
use super::connection::SharedState;
use super::rollup::reduce;
use super::table::format_bytes;
use super::{download, listen, run_test, stop};

fn run_async_test<F>(future: F) -> AppResult<()>
where
    F: std::future::Future<Output = AppResult<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(|err| AppError::config(format!("Failed to build runtime: {}", err)))?;
    runtime.block_on(future)
}

fn allocate_port() -> AppResult<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|err| AppError::config(format!("Failed to bind port: {}", err)))?;
    let port = listener
        .local_addr()
        .map_err(|err| AppError::config(format!("Failed to read local addr: {}", err)))?
        .port();
    Ok(port)
}

async fn spawn_agent(host: &str, port: u16, storage: &std::path::Path) -> AppResult<()> {
    let address = format!("{}:{}", host, port);
    let listener = crate::agent::bind_listener(&address)?;
    let base = storage.join("hperf-tests");
    std::fs::create_dir_all(&base)?;
    let state = crate::agent::AgentState::new(address, None, base);
    tokio::spawn(async move {
        drop(axum::serve(listener, crate::agent::router(state)).await);
    });
    Ok(())
}

fn loopback_config(test_id: &str, port: u16) -> Config {
    let mut config = sample_config(test_id);
    config.hosts = vec!["127.0.0.1".to_owned(), "127.0.0.2".to_owned()];
    config.port = port;
    config.duration_secs = 2;
    config.concurrency = 1;
    config.payload_bytes = 1000;
    config.buffer_bytes = 1000;
    config.request_delay_ms = 100;
    config.dial_timeout_secs = 2;
    config.restart_on_error = false;
    config.save = true;
    config
}

#[test]
fn rollup_reduces_extremes_and_totals() {
    let mut fast = sample_point("rollup", "10.0.0.1:9010");
    fast.tx_rate = 100;
    fast.tx_total = 100;
    fast.tx_count = 3;
    fast.rms_low = 50;
    fast.rms_high = 80;
    let mut slow = sample_point("rollup", "10.0.0.2:9010");
    slow.tx_rate = 900;
    slow.tx_total = 900;
    slow.tx_count = 7;
    slow.rms_low = 200;
    slow.rms_high = 4000;

    let output = reduce(&[fast, slow], 2).expect("two points reduce to a row");
    assert_eq!(output.err_count, 2);
    assert_eq!(output.txc, 10);
    assert_eq!(output.txt, 1000);
    assert_eq!(output.txl, 100);
    assert_eq!(output.txh, 900);
    assert_eq!(output.rmsl, 50);
    assert_eq!(output.rmsh, 4000);
}

#[test]
fn rollup_of_no_points_prints_nothing() {
    assert!(reduce(&[], 0).is_none());
}

#[test]
fn brackets_partition_every_point() {
    let mut points: Vec<_> = (1..=20)
        .map(|i| {
            let mut point = sample_point("brackets", "10.0.0.1:9010");
            point.rms_high = i64::from(i) * 100;
            point.rms_low = i64::from(i) * 10;
            point
        })
        .collect();

    let analysis = analyze_points(&mut points, SortKey::Rmsh);
    assert_eq!(analysis.total_count(), 20);
    assert!(analysis.low.count > 0);
    assert!(analysis.high.count > 0);
    assert!(analysis.low.max <= analysis.high.min);
    assert!(analysis.low.min <= analysis.low.mean && analysis.low.mean <= analysis.low.max);
}

#[test]
fn sentinel_points_sort_into_the_tail() {
    let mut points: Vec<_> = (1..=9)
        .map(|i| {
            let mut point = sample_point("sentinel", "10.0.0.1:9010");
            point.rms_high = i64::from(i) * 100;
            point
        })
        .collect();
    let mut unobserved = sample_point("sentinel", "10.0.0.2:9010");
    unobserved.rms_high = 0;
    unobserved.rms_low = LOW_SENTINEL;
    points.push(unobserved);

    let analysis = analyze_points(&mut points, SortKey::Rmsh);
    assert_eq!(analysis.high.max, LOW_SENTINEL);
    assert_eq!(analysis.total_count(), 10);
}

#[test]
fn brackets_sort_by_ttfb_when_asked() {
    let mut points: Vec<_> = (1..=10)
        .map(|i| {
            let mut point = sample_point("ttfb", "10.0.0.1:9010");
            point.ttfb_high = i64::from(11 - i) * 10;
            point
        })
        .collect();
    let analysis = analyze_points(&mut points, SortKey::Ttfbh);
    assert!(analysis.low.max <= analysis.high.min);
}

#[test]
fn shared_state_drains_points_once_but_archives_them() {
    let shared = SharedState::default();
    shared.record_stats(vec![sample_point("drain", "10.0.0.1:9010")], Vec::new());
    assert_eq!(shared.drain_points().len(), 1);
    assert!(shared.drain_points().is_empty());
    shared.record_stats(vec![sample_point("drain", "10.0.0.2:9010")], Vec::new());
    assert_eq!(shared.all_points().len(), 2);
}

#[test]
fn shared_state_parses_prefixed_result_lines() -> AppResult<()> {
    let shared = SharedState::default();
    let point = sample_point("lines", "10.0.0.1:9010");
    let line = format!("0{}", serde_json::to_string(&point)?);
    shared.record_line(&line)?;
    let error_line = format!(
        "1{}",
        serde_json::to_string(&crate::control::TError {
            created: chrono::Utc::now(),
            error: "bad".to_owned(),
        })?
    );
    shared.record_line(&error_line)?;
    assert!(matches!(
        shared.record_line("7{}"),
        Err(ControlError::UnknownPrefix { prefix: b'7' })
    ));
    assert_eq!(shared.all_points().len(), 1);
    assert_eq!(shared.all_errors().len(), 1);
    Ok(())
}

#[test]
fn byte_formatting_scales_units() {
    assert_eq!(format_bytes(512), "512 B");
    assert_eq!(format_bytes(32_000), "32.00 KB");
    assert_eq!(format_bytes(1_000_000), "1.00 MB");
    assert_eq!(format_bytes(2_500_000_000), "2.50 GB");
}

#[test]
fn latency_test_round_trips_across_two_agents() -> AppResult<()> {
    run_async_test(async {
        let dir_a = tempfile::tempdir()?;
        let dir_b = tempfile::tempdir()?;
        let port = allocate_port()?;
        spawn_agent("127.0.0.1", port, dir_a.path()).await?;
        spawn_agent("127.0.0.2", port, dir_b.path()).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut config = loopback_config("s1-latency", port);
        config.kind = TestKind::Latency;
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let outcome = tokio::time::timeout(
            Duration::from_secs(30),
            run_test(config.clone(), cancel_rx.clone()),
        )
        .await
        .map_err(|_| AppError::config("Latency run did not finish"))??;

        if outcome.points.is_empty() {
            return Err(AppError::config("Expected data points from both agents"));
        }

        // Both agents excluded themselves and probed the other side.
        let remotes: std::collections::HashSet<_> = outcome
            .points
            .iter()
            .map(|point| point.remote.clone())
            .collect();
        assert!(remotes.contains(&format!("127.0.0.1:{}", port)));
        assert!(remotes.contains(&format!("127.0.0.2:{}", port)));

        // TXCount never decreases per peer, and observed round trips are
        // plausible for a loopback.
        let mut by_remote: HashMap<String, Vec<_>> = HashMap::new();
        for point in &outcome.points {
            by_remote
                .entry(point.remote.clone())
                .or_default()
                .push(point.clone());
        }
        for points in by_remote.values_mut() {
            points.sort_by_key(|point| point.created);
            for pair in points.windows(2) {
                assert!(pair[1].tx_count >= pair[0].tx_count);
            }
            for point in points.iter().filter(|point| point.round_trip_observed()) {
                assert!(point.rms_low <= point.rms_high);
                assert!(point.rms_high < 50_000, "loopback RMS above 50ms");
            }
        }

        // Save=true produced a first rotation file on each agent.
        assert!(dir_a.path().join("hperf-tests").join("s1-latency.1").exists());
        assert!(dir_b.path().join("hperf-tests").join("s1-latency.1").exists());

        // Download the results and run the offline analysis pass.
        let out_file = dir_a.path().join("downloaded.result");
        let mut download_config = config.clone();
        download_config.duration_secs = 5;
        download_config.file = Some(out_file.display().to_string());
        download(download_config, cancel_rx.clone()).await?;

        let (mut points, _errors) =
            super::read_result_file(&out_file.display().to_string()).await?;
        let total = points.len() as i64;
        assert!(total > 0);
        let analysis = analyze_points(&mut points, SortKey::Rmsh);
        assert_eq!(analysis.total_count(), total);
        if analysis.low.count > 0 && analysis.high.count > 0 {
            assert!(analysis.low.max <= analysis.high.min);
        }

        // The CSV export mirrors the data-point lines plus a header.
        let csv_path = super::csv::export(&out_file.display().to_string()).await?;
        let csv_text = tokio::fs::read_to_string(&csv_path).await?;
        assert_eq!(csv_text.lines().count() as i64, total + 1);
        let header = csv_text.lines().next().unwrap_or_default();
        assert!(header.starts_with("Created,Local,Remote"));
        Ok(())
    })
}

#[test]
fn stream_test_moves_bytes_on_the_loopback() -> AppResult<()> {
    run_async_test(async {
        let dir_a = tempfile::tempdir()?;
        let dir_b = tempfile::tempdir()?;
        let port = allocate_port()?;
        spawn_agent("127.0.0.1", port, dir_a.path()).await?;
        spawn_agent("127.0.0.2", port, dir_b.path()).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut config = loopback_config("s2-stream", port);
        config.kind = TestKind::Stream;
        config.duration_secs = 2;
        config.concurrency = 2;
        config.payload_bytes = 32_000;
        config.buffer_bytes = 32_000;
        config.request_delay_ms = 0;
        config.save = false;
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let outcome = tokio::time::timeout(
            Duration::from_secs(30),
            run_test(config, cancel_rx),
        )
        .await
        .map_err(|_| AppError::config("Stream run did not finish"))??;

        let moved: u64 = outcome.points.iter().map(|point| point.tx_total).sum();
        assert!(moved > 1_000_000, "loopback stream moved only {} bytes", moved);
        assert!(outcome.points.iter().all(|point| point.err_count == 0));

        let mut by_remote: HashMap<String, Vec<_>> = HashMap::new();
        for point in &outcome.points {
            by_remote
                .entry(point.remote.clone())
                .or_default()
                .push(point.clone());
        }
        for points in by_remote.values_mut() {
            // Streams never complete mid-test; telemetry must still arrive
            // every interval, not just for the first one.
            assert!(
                points.len() >= 2,
                "expected per-second points for the whole run, got {}",
                points.len()
            );
            points.sort_by_key(|point| point.created);
            for pair in points.windows(2) {
                assert!(pair[1].tx_count >= pair[0].tx_count);
            }
            assert!(points.iter().skip(1).any(|point| point.tx_total > 0));
        }
        Ok(())
    })
}

#[test]
fn stop_all_tests_drains_the_fleet_quickly() -> AppResult<()> {
    run_async_test(async {
        let dir_a = tempfile::tempdir()?;
        let dir_b = tempfile::tempdir()?;
        let port = allocate_port()?;
        spawn_agent("127.0.0.1", port, dir_a.path()).await?;
        spawn_agent("127.0.0.2", port, dir_b.path()).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut config = loopback_config("s4-cancel", port);
        config.duration_secs = 60;
        config.save = false;
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let run_handle = {
            let config = config.clone();
            let cancel_rx = cancel_rx.clone();
            tokio::spawn(async move { run_test(config, cancel_rx).await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;

        let mut stop_config = config.clone();
        stop_config.duration_secs = 5;
        stop(stop_config, cancel_rx.clone()).await?;

        let stopped_at = tokio::time::Instant::now();
        let joined = tokio::time::timeout(Duration::from_secs(8), run_handle)
            .await
            .map_err(|_| AppError::config("Run did not drain after StopAllTests"))?;
        joined.map_err(AppError::from)??;
        assert!(stopped_at.elapsed() < Duration::from_secs(8));
        Ok(())
    })
}

#[test]
fn listen_attaches_to_a_running_test() -> AppResult<()> {
    run_async_test(async {
        let dir_a = tempfile::tempdir()?;
        let dir_b = tempfile::tempdir()?;
        let port = allocate_port()?;
        spawn_agent("127.0.0.1", port, dir_a.path()).await?;
        spawn_agent("127.0.0.2", port, dir_b.path()).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut config = loopback_config("listen-live", port);
        config.duration_secs = 3;
        config.save = false;
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let run_handle = {
            let config = config.clone();
            let cancel_rx = cancel_rx.clone();
            tokio::spawn(async move { run_test(config, cancel_rx).await })
        };
        tokio::time::sleep(Duration::from_millis(700)).await;

        let listener_outcome = tokio::time::timeout(
            Duration::from_secs(30),
            listen(config.clone(), cancel_rx.clone()),
        )
        .await
        .map_err(|_| AppError::config("Listen did not finish with the test"))??;
        assert!(
            !listener_outcome.points.is_empty(),
            "Listener expected live points"
        );

        let joined = tokio::time::timeout(Duration::from_secs(10), run_handle)
            .await
            .map_err(|_| AppError::config("Run did not finish"))?;
        joined.map_err(AppError::from)??;
        Ok(())
    })
}

#[test]
fn listen_on_a_finished_test_gets_an_immediate_done() -> AppResult<()> {
    run_async_test(async {
        let dir = tempfile::tempdir()?;
        let port = allocate_port()?;
        spawn_agent("127.0.0.1", port, dir.path()).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut config = loopback_config("listen-done", port);
        config.hosts = vec!["127.0.0.1".to_owned()];
        config.duration_secs = 3;
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let started = tokio::time::Instant::now();
        let outcome = listen(config, cancel_rx).await?;
        assert!(outcome.points.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        Ok(())
    })
}

#[test]
fn restart_on_error_attaches_once_the_agent_returns() -> AppResult<()> {
    run_async_test(async {
        let dir_a = tempfile::tempdir()?;
        let dir_b = tempfile::tempdir()?;
        let port = allocate_port()?;
        spawn_agent("127.0.0.1", port, dir_a.path()).await?;

        // The second agent comes up only after the controller started dialing.
        let dir_b_path = dir_b.path().to_path_buf();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(spawn_agent("127.0.0.2", port, &dir_b_path).await);
        });

        let mut config = loopback_config("s6-restart", port);
        config.duration_secs = 2;
        config.restart_on_error = true;
        config.save = false;
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let outcome = tokio::time::timeout(
            Duration::from_secs(30),
            run_test(config, cancel_rx),
        )
        .await
        .map_err(|_| AppError::config("Restarting run did not finish"))??;
        assert!(
            !outcome.points.is_empty(),
            "Expected points after the late agent joined"
        );
        Ok(())
    })
}
