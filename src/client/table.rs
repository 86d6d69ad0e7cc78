use chrono::{DateTime, Utc};

use crate::control::{DataPoint, TError, TestInfo, TestKind};

use super::analyze::{Analysis, Bracket};
use super::rollup::TestOutput;

const COL: usize = 12;
const WIDE_COL: usize = 16;

fn print_columns(values: &[(String, usize)]) {
    let mut row = String::new();
    for (value, width) in values {
        row.push_str(&format!(" {:>width$} |", value, width = width));
    }
    println!("{}", row);
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    match bytes {
        0..=999 => format!("{} B", bytes),
        1_000..=999_999 => format!("{:.2} KB", bytes as f64 / 1_000.0),
        1_000_000..=999_999_999 => format!("{:.2} MB", bytes as f64 / 1_000_000.0),
        1_000_000_000..=999_999_999_999 => format!("{:.2} GB", bytes as f64 / 1_000_000_000.0),
        _ => format!("{:.2} TB", bytes as f64 / 1_000_000_000_000.0),
    }
}

pub(crate) fn format_rate(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

pub(super) fn print_remote_error(created: DateTime<Utc>, error: &str) {
    eprintln!("{} - {}", created.to_rfc3339(), error);
}

pub(super) fn print_terror(error: &TError) {
    eprintln!("{} - {}", error.created.to_rfc3339(), error.error);
}

pub(super) fn print_rollup_header(kind: TestKind) {
    let mut columns = vec![("Err".to_owned(), COL)];
    match kind {
        TestKind::Stream => {
            columns.extend([
                ("TX low".to_owned(), WIDE_COL),
                ("TX high".to_owned(), WIDE_COL),
                ("TX total".to_owned(), WIDE_COL),
            ]);
        }
        TestKind::Latency | TestKind::Request => {
            columns.extend([
                ("Requests".to_owned(), COL),
                ("RMS low".to_owned(), COL),
                ("RMS high".to_owned(), COL),
                ("TTFB low".to_owned(), COL),
                ("TTFB high".to_owned(), COL),
            ]);
        }
    }
    columns.extend([
        ("Dropped".to_owned(), COL),
        ("Mem low".to_owned(), COL),
        ("Mem high".to_owned(), COL),
        ("CPU low".to_owned(), COL),
        ("CPU high".to_owned(), COL),
    ]);
    print_columns(&columns);
}

pub(super) fn print_rollup_row(kind: TestKind, output: &TestOutput) {
    let mut columns = vec![(output.err_count.to_string(), COL)];
    match kind {
        TestKind::Stream => {
            columns.extend([
                (format_rate(output.txl), WIDE_COL),
                (format_rate(output.txh), WIDE_COL),
                (format_bytes(output.txt), WIDE_COL),
            ]);
        }
        TestKind::Latency | TestKind::Request => {
            columns.extend([
                (output.txc.to_string(), COL),
                (format_micros(output.rmsl), COL),
                (format_micros(output.rmsh), COL),
                (format_micros(output.ttfbl), COL),
                (format_micros(output.ttfbh), COL),
            ]);
        }
    }
    columns.extend([
        (output.dropped.to_string(), COL),
        (output.ml.to_string(), COL),
        (output.mh.to_string(), COL),
        (output.cl.to_string(), COL),
        (output.ch.to_string(), COL),
    ]);
    print_columns(&columns);
}

fn format_micros(micros: i64) -> String {
    if micros == i64::MAX {
        "-".to_owned()
    } else {
        micros.to_string()
    }
}

pub(super) fn print_data_point_header(kind: TestKind) {
    let mut columns = vec![
        ("Created".to_owned(), COL),
        ("Local".to_owned(), WIDE_COL),
        ("Remote".to_owned(), WIDE_COL),
    ];
    match kind {
        TestKind::Stream => {
            columns.extend([("TX".to_owned(), WIDE_COL)]);
        }
        TestKind::Latency | TestKind::Request => {
            columns.extend([
                ("RMS high".to_owned(), COL),
                ("RMS low".to_owned(), COL),
                ("TTFB high".to_owned(), COL),
                ("TTFB low".to_owned(), COL),
                ("TX".to_owned(), WIDE_COL),
                ("Requests".to_owned(), COL),
            ]);
        }
    }
    columns.extend([
        ("Err".to_owned(), COL),
        ("Dropped".to_owned(), COL),
        ("Mem".to_owned(), COL),
        ("CPU".to_owned(), COL),
    ]);
    print_columns(&columns);
}

pub(super) fn print_data_point_row(point: &DataPoint) {
    let mut columns = vec![
        (point.created.format("%H:%M:%S").to_string(), COL),
        (strip_port(&point.local), WIDE_COL),
        (strip_port(&point.remote), WIDE_COL),
    ];
    match point.kind {
        TestKind::Stream => {
            columns.extend([(format_rate(point.tx_rate), WIDE_COL)]);
        }
        TestKind::Latency | TestKind::Request => {
            columns.extend([
                (format_micros(point.rms_high), COL),
                (format_micros(point.rms_low), COL),
                (format_micros(point.ttfb_high), COL),
                (format_micros(point.ttfb_low), COL),
                (format_rate(point.tx_rate), WIDE_COL),
                (point.tx_count.to_string(), COL),
            ]);
        }
    }
    columns.extend([
        (point.err_count.to_string(), COL),
        (point.dropped_packets.to_string(), COL),
        (point.memory_used_percent.to_string(), COL),
        (point.cpu_used_percent.to_string(), COL),
    ]);
    print_columns(&columns);
}

pub(super) fn print_test_list(mut tests: Vec<TestInfo>) {
    tests.sort_by(|a, b| b.time.cmp(&a.time));
    print_columns(&[
        ("#".to_owned(), 4),
        ("ID".to_owned(), WIDE_COL),
        ("First seen".to_owned(), WIDE_COL + 4),
    ]);
    for (index, info) in tests.iter().enumerate() {
        print_columns(&[
            (index.to_string(), 4),
            (info.id.clone(), WIDE_COL),
            (info.time.format("%d/%m/%Y %l:%M %p").to_string(), WIDE_COL + 4),
        ]);
    }
}

pub(super) fn print_analysis(analysis: &Analysis) {
    println!();
    println!(" First 10% of data points");
    print_bracket(&analysis.low);
    println!();
    println!(" Between 10% and 90%");
    print_bracket(&analysis.mid);
    println!();
    println!(" Last 10% of data points");
    print_bracket(&analysis.high);
    println!();
}

fn print_bracket(bracket: &Bracket) {
    println!(
        " Total {} | Low {} | Avg {} | High {} | Microseconds",
        bracket.count,
        format_micros(bracket.min),
        bracket.mean,
        bracket.max,
    );
}
