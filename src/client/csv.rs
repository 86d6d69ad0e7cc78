use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::control::{DataPoint, FilePrefix};
use crate::error::AppResult;

/// Export a downloaded result file as `{file}.csv` using the explicit
/// DataPoint schema. Error lines are not part of the schema and are skipped.
pub(super) async fn export(input: &str) -> AppResult<PathBuf> {
    let output_path = PathBuf::from(format!("{}.csv", input));
    let input_file = tokio::fs::File::open(input).await?;
    let mut output = tokio::fs::File::create(&output_path).await?;

    output
        .write_all(DataPoint::CSV_COLUMNS.join(",").as_bytes())
        .await?;
    output.write_all(b"\n").await?;

    let mut lines = BufReader::new(input_file).lines();
    while let Some(line) = lines.next_line().await? {
        let bytes = line.as_bytes();
        let Some((&prefix, body)) = bytes.split_first() else {
            continue;
        };
        if FilePrefix::from_byte(prefix) != Some(FilePrefix::DataPoint) {
            continue;
        }
        let point: DataPoint = serde_json::from_slice(body)?;
        output
            .write_all(point.csv_row().join(",").as_bytes())
            .await?;
        output.write_all(b"\n").await?;
    }
    output.flush().await?;
    Ok(output_path)
}
