use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::core::{RawMarketArchive, StatsArchive};
use crate::error::{Error, Result};

pub fn load_raw_archive(path: &Path) -> Result<RawMarketArchive> {
    read_archive(path, "Raw market", "finpilot generate")
}

pub fn load_stats_archive(path: &Path) -> Result<StatsArchive> {
    read_archive(path, "Statistics", "finpilot analyze")
}

fn read_archive<T: DeserializeOwned>(
    path: &Path,
    kind: &'static str,
    producer: &'static str,
) -> Result<T> {
    if !path.exists() {
        return Err(Error::ArchiveNotFound {
            kind,
            path: path.to_path_buf(),
            producer,
        });
    }
    let reader = BufReader::new(File::open(path)?);
    let archive = serde_json::from_reader(reader)?;
    debug!(path = %path.display(), kind, "loaded archive");
    Ok(archive)
}

/// Writes `value` as pretty JSON to a temp file in the target's directory,
/// syncs it and persists it over `path`, so readers never observe a partial
/// archive. The temp file is removed on drop if any step fails.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), "persisted archive");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::tempdir;

    fn sample_raw_archive() -> RawMarketArchive {
        serde_json::from_value(json!({
            "market_trends": {"bonds": [{"date": "2024-01-02", "value": 100.25}]}
        }))
        .expect("archive")
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn missing_archive_names_path_and_producer() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("market_stats.json");

        let err = load_stats_archive(&path).expect_err("must fail");
        assert!(matches!(err, Error::ArchiveNotFound { .. }));
        let message = err.to_string();
        assert!(message.contains("market_stats.json"));
        assert!(message.contains("finpilot analyze"));
    }

    #[test]
    fn atomic_write_replaces_target_and_leaves_no_temp_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("market_trends.json");
        fs::write(&path, "stale").expect("seed file");

        let archive = sample_raw_archive();
        write_json_atomic(&path, &archive).expect("write");

        assert_eq!(dir_entries(temp.path()), vec!["market_trends.json".to_string()]);
        let loaded = load_raw_archive(&path).expect("load");
        assert_eq!(loaded, archive);
    }

    #[test]
    fn atomic_write_is_not_blocked_by_leftover_temp_names() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("market_trends.json");
        fs::create_dir(temp.path().join(".market_trends.json.tmp")).expect("leftover dir");

        let archive = sample_raw_archive();
        write_json_atomic(&path, &archive).expect("first write");
        write_json_atomic(&path, &archive).expect("second write");

        assert_eq!(
            dir_entries(temp.path()),
            vec![
                ".market_trends.json.tmp".to_string(),
                "market_trends.json".to_string()
            ]
        );
        assert_eq!(load_raw_archive(&path).expect("load"), archive);
    }

    #[test]
    fn failed_write_leaves_target_and_directory_untouched() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("market_stats.json");
        fs::write(&path, "previous").expect("seed file");

        let mut unserializable = BTreeMap::new();
        unserializable.insert(vec![1u8], 1.0);
        let err = write_json_atomic(&path, &unserializable).expect_err("must fail");
        assert!(matches!(err, Error::Json(_)));

        assert_eq!(fs::read_to_string(&path).expect("read"), "previous");
        assert_eq!(dir_entries(temp.path()), vec!["market_stats.json".to_string()]);
    }

    #[test]
    fn malformed_json_is_reported_as_json_error() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("market_trends.json");
        fs::write(&path, "{ not json").expect("seed file");

        let err = load_raw_archive(&path).expect_err("must fail");
        assert!(matches!(err, Error::Json(_)));
    }
}
