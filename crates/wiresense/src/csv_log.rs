//! Append-only CSV log, one file per sensor.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::LogError;
use crate::reading::Reading;
use crate::TIMESTAMP_COLUMN;

/// CSV file holding every reading of one sensor.
///
/// The header is fixed by the first reading ever written to the file. Rows
/// are reordered to match it, so producers may return metrics in any order.
#[derive(Debug)]
pub struct CsvLog {
    path: PathBuf,
    columns: Vec<String>,
    timestamp_column: bool,
    append_lock: Mutex<()>,
}

impl CsvLog {
    /// Opens or creates the log at `path`.
    ///
    /// An existing non-empty file keeps its header; `first` must match it.
    /// Otherwise the header is written from `first`'s metric names.
    pub fn create(
        path: impl Into<PathBuf>,
        first: &Reading,
        timestamp_column: bool,
    ) -> Result<Self, LogError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let log = match read_header(&path)? {
            Some(header) => {
                let columns = split_header(header, timestamp_column)?;
                terminate_last_line(&path)?;
                info!("Appending to existing log {}", path.display());
                Self {
                    path,
                    columns,
                    timestamp_column,
                    append_lock: Mutex::new(()),
                }
            }
            None => {
                let columns: Vec<String> = first.keys().map(str::to_string).collect();
                let mut writer = csv::Writer::from_writer(Vec::new());
                if timestamp_column {
                    writer.write_field(TIMESTAMP_COLUMN)?;
                }
                writer.write_record(&columns)?;
                let bytes = writer.into_inner().map_err(|e| e.into_error())?;
                fs::write(&path, bytes)?;
                info!("Created log {}", path.display());
                Self {
                    path,
                    columns,
                    timestamp_column,
                    append_lock: Mutex::new(()),
                }
            }
        };

        log.check(first)?;
        Ok(log)
    }

    /// Path of the CSV file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metric columns in file order, without the timestamp column.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Full header row as written in the file.
    pub fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.columns.len() + 1);
        if self.timestamp_column {
            header.push(TIMESTAMP_COLUMN.to_string());
        }
        header.extend(self.columns.iter().cloned());
        header
    }

    /// Verifies that `reading` carries exactly the header's metrics.
    pub fn check(&self, reading: &Reading) -> Result<(), LogError> {
        let matches = reading.len() == self.columns.len()
            && self.columns.iter().all(|c| reading.get(c).is_some());
        if matches {
            Ok(())
        } else {
            Err(LogError::Mismatch {
                expected: self.columns.clone(),
                found: reading.keys().map(str::to_string).collect(),
            })
        }
    }

    /// Appends one row. Nothing is written when the reading does not match.
    ///
    /// The row is encoded up front and written with a single call, so a
    /// failed write cannot interleave with or damage earlier rows.
    pub async fn append(&self, reading: &Reading, timestamp: i64) -> Result<(), LogError> {
        self.check(reading)?;
        let row = self.encode_row(reading, timestamp)?;

        let _guard = self.append_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&row).await?;
        file.flush().await?;
        debug!("Appended {} bytes to {}", row.len(), self.path.display());
        Ok(())
    }

    fn encode_row(&self, reading: &Reading, timestamp: i64) -> Result<Vec<u8>, LogError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if self.timestamp_column {
            writer.write_field(timestamp.to_string())?;
        }
        for column in &self.columns {
            // check() guarantees every column is present
            let value = reading.get(column).map(|v| v.to_string()).unwrap_or_default();
            writer.write_field(value)?;
        }
        writer.write_record(None::<&[u8]>)?;
        writer.into_inner().map_err(|e| LogError::Io(e.into_error()))
    }
}

/// Returns `<stem>_<timestamp>.<ext>` for per-run log files.
pub fn per_run_path(base: &Path, timestamp: i64) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{}_{}.{}", stem, timestamp, ext.to_string_lossy()),
        None => format!("{}_{}", stem, timestamp),
    };
    base.with_file_name(name)
}

fn read_header(path: &Path) -> Result<Option<Vec<String>>, LogError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);
    match reader.records().next() {
        Some(record) => Ok(Some(record?.iter().map(str::to_string).collect())),
        None => Ok(None),
    }
}

/// Adds the line break missing after the file's last row, if any.
fn terminate_last_line(path: &Path) -> Result<(), LogError> {
    let mut file = fs::OpenOptions::new().read(true).append(true).open(path)?;
    if file.seek(SeekFrom::End(0))? == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        debug!("Terminating last row of {}", path.display());
        file.write_all(b"\n")?;
        file.flush()?;
    }
    Ok(())
}

fn split_header(mut header: Vec<String>, timestamp_column: bool) -> Result<Vec<String>, LogError> {
    let has_timestamp = header.first().map(String::as_str) == Some(TIMESTAMP_COLUMN);
    if has_timestamp != timestamp_column {
        let mut expected = Vec::new();
        if timestamp_column {
            expected.push(TIMESTAMP_COLUMN.to_string());
        }
        expected.extend(header.iter().skip(has_timestamp as usize).cloned());
        return Err(LogError::Mismatch {
            expected,
            found: header,
        });
    }
    if has_timestamp {
        header.remove(0);
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp() -> Reading {
        Reading::new().with("Temp", 5)
    }

    #[tokio::test]
    async fn test_header_then_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp.csv");
        let log = CsvLog::create(&path, &temp(), false).unwrap();
        log.append(&temp(), 0).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Temp\n5\n");
    }

    #[tokio::test]
    async fn test_rows_follow_first_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.csv");
        let first = Reading::new().with("b", 1).with("a", 2);
        let log = CsvLog::create(&path, &first, false).unwrap();

        let swapped = Reading::new().with("a", 20).with("b", 10);
        log.append(&swapped, 0).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "b,a\n10,20\n");
    }

    #[tokio::test]
    async fn test_timestamp_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ts.csv");
        let log = CsvLog::create(&path, &temp(), true).unwrap();
        assert_eq!(log.header(), ["timestamp", "Temp"]);
        log.append(&temp(), 1_700_000_000).await.unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "timestamp,Temp\n1700000000,5\n"
        );
    }

    #[tokio::test]
    async fn test_mismatch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.csv");
        let log = CsvLog::create(&path, &temp(), false).unwrap();
        let other = Reading::new().with("Pressure", 1013);
        assert!(matches!(
            log.append(&other, 0).await,
            Err(LogError::Mismatch { .. })
        ));
        let extra = temp().with("Humidity", 3);
        assert!(log.append(&extra, 0).await.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "Temp\n");
    }

    #[tokio::test]
    async fn test_reopen_adopts_existing_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.csv");
        fs::write(&path, "y,x\n1,2\n").unwrap();

        let log = CsvLog::create(&path, &Reading::new().with("x", 3).with("y", 4), false).unwrap();
        assert_eq!(log.columns(), ["y", "x"]);
        log.append(&Reading::new().with("x", 3).with("y", 4), 0)
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "y,x\n1,2\n4,3\n");
    }

    #[tokio::test]
    async fn test_reopen_terminates_last_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unterminated.csv");
        fs::write(&path, "Temp\n5").unwrap();

        let log = CsvLog::create(&path, &Reading::new().with("Temp", 6), false).unwrap();
        log.append(&Reading::new().with("Temp", 6), 0).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Temp\n5\n6\n");
    }

    #[tokio::test]
    async fn test_reopen_header_only_without_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.csv");
        fs::write(&path, "Temp").unwrap();

        let log = CsvLog::create(&path, &temp(), false).unwrap();
        log.append(&temp(), 0).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Temp\n5\n");
    }

    #[test]
    fn test_reopen_rejects_timestamp_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ts.csv");
        fs::write(&path, "Temp\n5\n").unwrap();
        assert!(matches!(
            CsvLog::create(&path, &temp(), true),
            Err(LogError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.csv");
        CsvLog::create(&path, &temp(), false).unwrap();
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn test_quoting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.csv");
        let reading = Reading::new().with("temp, inside", 1.5);
        let log = CsvLog::create(&path, &reading, false).unwrap();
        log.append(&reading, 0).await.unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "\"temp, inside\"\n1.5\n"
        );
    }

    #[test]
    fn test_per_run_path() {
        assert_eq!(
            per_run_path(Path::new("logs/temp.csv"), 42),
            PathBuf::from("logs/temp_42.csv")
        );
        assert_eq!(
            per_run_path(Path::new("data"), 7),
            PathBuf::from("data_7")
        );
    }
}
