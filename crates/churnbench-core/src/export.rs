//! Result files.
//!
//! Every file is created with create-new semantics: an existing file is an
//! error, never overwritten.
//!
//! ```text
//! <workdir>/out/<name | unix millis>/
//!   measurements.json   column-oriented MeasurementSeries
//!   run.json            RunConfig + RunSummary
//! ```

use crate::error::{BenchError, BenchResult};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const MEASUREMENTS_FILE: &str = "measurements.json";
pub const RUN_FILE: &str = "run.json";

/// `<workdir>/out/<name>`, or `<workdir>/out/<unix millis>` when unnamed.
pub fn output_dir(workdir: &Path, name: Option<&str>) -> PathBuf {
    let leaf = match name {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => chrono::Utc::now().timestamp_millis().to_string(),
    };
    workdir.join("out").join(leaf)
}

/// Serializes `value` as pretty JSON into a new file at `path`.
pub fn write_json_new<T: Serialize + ?Sized>(path: &Path, what: &'static str, value: &T) -> BenchResult<()> {
    let export_err = |source: std::io::Error| BenchError::Export {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(export_err)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(export_err)?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, value).map_err(|source| BenchError::Serialize { what, source })?;
    out.write_all(b"\n").map_err(export_err)?;
    out.flush().map_err(export_err)?;
    tracing::debug!(path = %path.display(), what, "exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn named_and_timestamped_dirs() {
        let wd = Path::new("/work");
        assert_eq!(output_dir(wd, Some("run-a")), PathBuf::from("/work/out/run-a"));
        let stamped = output_dir(wd, None);
        let leaf = stamped.file_name().unwrap().to_str().unwrap();
        assert!(leaf.parse::<i64>().is_ok(), "{leaf}");
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.json");
        write_json_new(&path, "test", &vec![1, 2, 3]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(serde_json::from_str::<Vec<i32>>(&text).unwrap(), vec![1, 2, 3]);

        let err = write_json_new(&path, "test", &vec![4]).unwrap_err();
        assert!(matches!(err, BenchError::Export { .. }));
    }
}
