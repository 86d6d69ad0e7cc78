use chrono::Utc;

use crate::error::AppResult;

use super::*;

pub(crate) fn sample_config(test_id: &str) -> Config {
    Config {
        test_id: test_id.to_owned(),
        kind: TestKind::Request,
        duration_secs: 3,
        concurrency: 1,
        payload_bytes: 1000,
        buffer_bytes: 1000,
        request_delay_ms: 200,
        port: 9010,
        hosts: vec!["10.10.10.1".to_owned(), "10.10.10.2".to_owned()],
        insecure: true,
        save: true,
        restart_on_error: false,
        dial_timeout_secs: 0,
        file: None,
        print_full: false,
        print_errors: false,
        sort: SortKey::default(),
        host_filter: None,
    }
}

pub(crate) fn sample_point(test_id: &str, remote: &str) -> DataPoint {
    DataPoint {
        created: Utc::now(),
        local: "127.0.0.1:9010".to_owned(),
        remote: remote.to_owned(),
        test_id: test_id.to_owned(),
        kind: TestKind::Request,
        rms_high: 1800,
        rms_low: 400,
        ttfb_high: 900,
        ttfb_low: 200,
        tx_rate: 1_000_000,
        tx_total: 1_000_000,
        tx_count: 5,
        err_count: 0,
        dropped_packets: 0,
        memory_used_percent: 10,
        cpu_used_percent: 5,
        received: None,
    }
}

#[test]
fn signal_round_trips_through_json() -> AppResult<()> {
    let signal = Signal::Stats {
        points: vec![sample_point("t1", "10.10.10.2:9010")],
        errors: vec![TError {
            created: Utc::now(),
            error: "connection reset".to_owned(),
        }],
    };
    let encoded = signal.encode()?;
    let decoded = Signal::decode(&encoded)?;
    match decoded {
        Signal::Stats { points, errors } => {
            if points.len() != 1 || errors.len() != 1 {
                return Err(crate::error::AppError::control(
                    "Stats payload changed size across encode/decode",
                ));
            }
            if points[0].remote != "10.10.10.2:9010" {
                return Err(crate::error::AppError::control("Remote address changed"));
            }
        }
        other => {
            return Err(crate::error::AppError::control(format!(
                "Expected Stats, decoded {:?}",
                other
            )));
        }
    }
    Ok(())
}

#[test]
fn run_test_carries_the_config() -> AppResult<()> {
    let signal = Signal::RunTest {
        config: sample_config("run-1"),
    };
    let encoded = signal.encode()?;
    match Signal::decode(&encoded)? {
        Signal::RunTest { config } => {
            if config.test_id != "run-1" || config.hosts.len() != 2 {
                return Err(crate::error::AppError::control("Config payload mangled"));
            }
        }
        other => {
            return Err(crate::error::AppError::control(format!(
                "Expected RunTest, decoded {:?}",
                other
            )));
        }
    }
    Ok(())
}

#[test]
fn unknown_tag_is_rejected() {
    assert!(Signal::decode(r#"{"SType":"Bogus"}"#).is_err());
}

#[test]
fn run_test_without_config_is_rejected() {
    assert!(Signal::decode(r#"{"SType":"RunTest"}"#).is_err());
}

#[test]
fn greeting_carries_ok_code() -> AppResult<()> {
    let encoded = Signal::greeting().encode()?;
    match Signal::decode(&encoded)? {
        Signal::Ping { code } => assert_eq!(code, SignalCode::Ok),
        other => panic!("Expected Ping, decoded {:?}", other),
    }
    Ok(())
}

#[test]
fn client_only_fields_stay_off_the_wire() -> AppResult<()> {
    let mut config = sample_config("wire");
    config.file = Some("/tmp/out".to_owned());
    config.print_full = true;
    let encoded = serde_json::to_string(&config)?;
    assert!(!encoded.contains("/tmp/out"));
    let decoded: Config = serde_json::from_str(&encoded)?;
    assert!(decoded.file.is_none());
    Ok(())
}

#[test]
fn data_point_json_uses_the_wire_field_tags() -> AppResult<()> {
    let encoded = serde_json::to_string(&sample_point("tags", "peer:9010"))?;
    for tag in ["\"TestID\"", "\"RMSH\"", "\"RMSL\"", "\"TTFBH\"", "\"TX\"", "\"TXCount\""] {
        assert!(encoded.contains(tag), "missing {} in {}", tag, encoded);
    }
    assert!(!encoded.contains("Received"));
    Ok(())
}

#[test]
fn csv_row_matches_the_schema_width() {
    let point = sample_point("csv", "peer:9010");
    assert_eq!(point.csv_row().len(), DataPoint::CSV_COLUMNS.len());
}

#[test]
fn file_prefix_bytes_round_trip() {
    assert_eq!(FilePrefix::from_byte(FilePrefix::DataPoint.byte()), Some(FilePrefix::DataPoint));
    assert_eq!(FilePrefix::from_byte(FilePrefix::Error.byte()), Some(FilePrefix::Error));
    assert_eq!(FilePrefix::from_byte(b'7'), None);
}

#[test]
fn sort_key_parses_both_vocabularies() {
    assert_eq!("RMSH".parse::<SortKey>().ok(), Some(SortKey::Rmsh));
    assert_eq!("ttfbh".parse::<SortKey>().ok(), Some(SortKey::Ttfbh));
    assert!("PMSH".parse::<SortKey>().is_err());
}

#[test]
fn sentinel_detection_flags_points_without_round_trips() {
    let mut point = sample_point("sentinel", "peer:9010");
    assert!(point.round_trip_observed());
    point.rms_high = 0;
    point.rms_low = LOW_SENTINEL;
    assert!(!point.round_trip_observed());
}

#[test]
fn dial_timeout_defaults_when_zero() {
    let config = sample_config("dial");
    assert_eq!(config.dial_timeout(), std::time::Duration::from_secs(10));
}
