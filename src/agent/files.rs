use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::control::{FilePrefix, TestInfo};
use crate::error::AppResult;

pub(super) const TEST_FOLDER: &str = "hperf-tests";

/// Creates `{storage}/hperf-tests/` and returns it.
pub(super) async fn ensure_base_path(storage: &Path) -> AppResult<PathBuf> {
    let base = storage.join(TEST_FOLDER);
    fs::create_dir_all(&base).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&base, std::fs::Permissions::from_mode(0o777)).await?;
    }
    Ok(base)
}

fn file_index(name: &str, test_id: &str) -> Option<u32> {
    name.strip_prefix(test_id)?
        .strip_prefix('.')?
        .parse()
        .ok()
}

/// Next rotation index for a test: one past the highest index on disk, so a
/// restarted test keeps rotating upward instead of clobbering prior runs.
pub(super) async fn next_file_index(base: &Path, test_id: &str) -> AppResult<u32> {
    let mut highest = 0;
    let mut entries = match fs::read_dir(base).await {
        Ok(entries) => entries,
        Err(_) => return Ok(1),
    };
    while let Some(entry) = entries.next_entry().await? {
        if let Some(index) = entry
            .file_name()
            .to_str()
            .and_then(|name| file_index(name, test_id))
        {
            highest = highest.max(index);
        }
    }
    Ok(highest + 1)
}

pub(super) async fn create_test_file(
    base: &Path,
    test_id: &str,
    index: u32,
) -> std::io::Result<fs::File> {
    fs::create_dir_all(base).await?;
    let path = base.join(format!("{}.{}", test_id, index));
    let mut options = fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o666);
    options.open(&path).await
}

pub(super) async fn write_record(
    file: &mut fs::File,
    prefix: FilePrefix,
    body: &[u8],
) -> std::io::Result<()> {
    file.write_all(&[prefix.byte()]).await?;
    file.write_all(body).await?;
    file.write_all(b"\n").await
}

/// Persisted tests, discovered from their first rotation file.
pub(super) async fn list_tests(base: &Path) -> AppResult<Vec<TestInfo>> {
    let mut tests = Vec::new();
    let mut entries = match fs::read_dir(base).await {
        Ok(entries) => entries,
        Err(_) => return Ok(tests),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(id) = name.to_str().and_then(|name| name.strip_suffix(".1")) else {
            continue;
        };
        let modified = entry.metadata().await?.modified()?;
        tests.push(TestInfo {
            id: id.to_owned(),
            time: DateTime::<Utc>::from(modified),
        });
    }
    Ok(tests)
}

/// All rotation files for a test, ordered by index.
pub(super) async fn test_files_sorted(base: &Path, test_id: &str) -> AppResult<Vec<PathBuf>> {
    let mut files: Vec<(u32, PathBuf)> = Vec::new();
    let mut entries = match fs::read_dir(base).await {
        Ok(entries) => entries,
        Err(_) => return Ok(Vec::new()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if let Some(index) = entry
            .file_name()
            .to_str()
            .and_then(|name| file_index(name, test_id))
        {
            files.push((index, entry.path()));
        }
    }
    files.sort_by_key(|(index, _)| *index);
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Removes all files for one test; an empty id removes the whole store.
pub(super) async fn delete_tests(base: &Path, test_id: &str) -> AppResult<()> {
    if test_id.is_empty() {
        match fs::remove_dir_all(base).await {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }
    for path in test_files_sorted(base, test_id).await? {
        fs::remove_file(path).await?;
    }
    Ok(())
}
