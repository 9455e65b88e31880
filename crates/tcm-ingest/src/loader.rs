//! Reading case records from the JSON source directory.
//!
//! Each file holds exactly one [`CaseRecord`]. Only `*.json` files whose
//! name starts with the configured prefix are considered, in file-name order.

use std::path::{Path, PathBuf};

use tcm_core::CaseRecord;

use crate::error::{IngestError, Result};

/// A parsed, validated record and the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedCase {
    pub path: PathBuf,
    pub record: CaseRecord,
}

/// The JSON case-record directory.
#[derive(Debug, Clone)]
pub struct CaseSource {
    dir: PathBuf,
    prefix: String,
}

impl CaseSource {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Matching case files, sorted by name.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Err(IngestError::DirectoryNotFound {
                path: self.dir.clone(),
            });
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(&self.prefix) && name.ends_with(".json") {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Load every matching file. Fails on the first unreadable or invalid
    /// record so nothing is written from a half-broken directory.
    pub fn load_all(&self) -> Result<Vec<LoadedCase>> {
        self.list()?.into_iter().map(|path| load_file(&path)).collect()
    }

    /// Resolve a bare file name inside the source directory.
    ///
    /// Names containing path components are rejected.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf> {
        let candidate = Path::new(file_name);
        let is_bare = candidate.components().count() == 1
            && candidate.file_name().is_some_and(|n| n == candidate.as_os_str());
        if file_name.is_empty() || !is_bare {
            return Err(IngestError::Invalid {
                path: candidate.to_path_buf(),
                reason: "expected a file name inside the source directory".to_string(),
            });
        }

        let path = self.dir.join(candidate);
        if !path.is_file() {
            return Err(IngestError::FileNotFound { path });
        }
        Ok(path)
    }
}

/// Parse and validate one case file.
pub fn load_file(path: &Path) -> Result<LoadedCase> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IngestError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => IngestError::Io(e),
    })?;

    let record: CaseRecord =
        serde_json::from_str(&content).map_err(|source| IngestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    record.validate().map_err(|reason| IngestError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;

    Ok(LoadedCase {
        path: path.to_path_buf(),
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    fn case_json(case_id: &str) -> String {
        format!(
            r#"{{"case_id": "{case_id}", "symptoms": ["咳嗽"],
                "prescriptions": [{{"herbs": [{{"name": "杏仁", "dose": "9g"}}]}}]}}"#
        )
    }

    #[test]
    fn test_list_filters_by_prefix_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f002.json", &case_json("2"));
        write(dir.path(), "f001.json", &case_json("1"));
        write(dir.path(), "notes.json", "{}");
        write(dir.path(), "f003.txt", "ignored");
        fs::create_dir(dir.path().join("f004.json")).unwrap();

        let source = CaseSource::new(dir.path(), "f");
        let names: Vec<String> = source
            .list()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["f001.json", "f002.json"]);
    }

    #[test]
    fn test_load_all_parses_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f2.json", &case_json("case-2"));
        write(dir.path(), "f1.json", &case_json("case-1"));

        let loaded = CaseSource::new(dir.path(), "f").load_all().unwrap();
        let ids: Vec<&str> = loaded.iter().map(|c| c.record.case_id.as_str()).collect();
        assert_eq!(ids, vec!["case-1", "case-2"]);
        assert_eq!(loaded[0].record.prescriptions[0].herbs[0].dose.as_deref(), Some("9g"));
        assert!(loaded[0].record.original_text.is_none());
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = CaseSource::new(dir.path().join("absent"), "f");
        assert!(matches!(source.list(), Err(IngestError::DirectoryNotFound { .. })));
    }

    #[test]
    fn test_bad_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f1.json", "{ not json");

        let err = CaseSource::new(dir.path(), "f").load_all().unwrap_err();
        match err {
            IngestError::Parse { path, .. } => assert!(path.ends_with("f1.json")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_case_id_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f1.json", r#"{"case_id": "  ", "symptoms": []}"#);

        let err = CaseSource::new(dir.path(), "f").load_all().unwrap_err();
        assert!(matches!(err, IngestError::Invalid { .. }));
    }

    #[test]
    fn test_resolve_stays_inside_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f1.json", &case_json("1"));
        let source = CaseSource::new(dir.path(), "f");

        assert_eq!(source.resolve("f1.json").unwrap(), dir.path().join("f1.json"));
        assert!(matches!(
            source.resolve("f9.json"),
            Err(IngestError::FileNotFound { .. })
        ));
        assert!(matches!(
            source.resolve("../f1.json"),
            Err(IngestError::Invalid { .. })
        ));
        assert!(matches!(source.resolve(""), Err(IngestError::Invalid { .. })));
    }
}
