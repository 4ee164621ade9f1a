use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub const TESTED_ON: &str = "tested_on";
pub const CAUGHT_BY_TEST: &str = "caught_by_test";
pub const TEST_OUTPUT: &str = "test_output";

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}:{line}: {reason}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One line of the corpus. Fields are kept in their original order and every
/// field this driver does not own round-trips untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct MutationRecord {
    fields: Map<String, Value>,
}

impl TryFrom<Map<String, Value>> for MutationRecord {
    type Error = String;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        for key in ["mutation_file", "description"] {
            match fields.get(key) {
                Some(Value::String(_)) => {}
                Some(_) => return Err(format!("field `{key}` must be a string")),
                None => return Err(format!("missing field `{key}`")),
            }
        }
        Ok(Self { fields })
    }
}

impl Serialize for MutationRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl MutationRecord {
    pub fn new(mutation_file: impl Into<String>, description: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("mutation_file".into(), Value::String(mutation_file.into()));
        fields.insert("description".into(), Value::String(description.into()));
        Self { fields }
    }

    fn str_field(&self, key: &str) -> &str {
        self.fields.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    pub fn mutation_file(&self) -> &str {
        self.str_field("mutation_file")
    }

    pub fn description(&self) -> &str {
        self.str_field("description")
    }

    pub fn tested_on(&self) -> Option<&str> {
        self.fields.get(TESTED_ON).and_then(Value::as_str)
    }

    /// `None` when the mutation could not be evaluated (or never was).
    pub fn caught_by_test(&self) -> Option<bool> {
        self.fields.get(CAUGHT_BY_TEST).and_then(Value::as_bool)
    }

    pub fn test_output(&self) -> Option<&str> {
        self.fields.get(TEST_OUTPUT).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Overwrite the three result fields. Nothing else is touched.
    pub fn record_outcome(&mut self, tested_on: String, caught: Option<bool>, output: String) {
        self.fields.insert(TESTED_ON.into(), Value::String(tested_on));
        self.fields.insert(
            CAUGHT_BY_TEST.into(),
            caught.map_or(Value::Null, Value::Bool),
        );
        self.fields.insert(TEST_OUTPUT.into(), Value::String(output));
    }
}

/// Load every record of a JSON-lines corpus. A missing file is an empty corpus.
pub fn load_corpus(path: &Path) -> Result<Vec<MutationRecord>, CorpusError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Mutations file not found");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(CorpusError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| CorpusError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: MutationRecord =
            serde_json::from_str(line).map_err(|e| CorpusError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: e.to_string(),
            })?;
        records.push(record);
    }
    debug!(path = %path.display(), count = records.len(), "Loaded corpus");
    Ok(records)
}

/// Rewrite the whole corpus, one record per line. The new content is written
/// to a sibling temp file and renamed over the original.
pub fn save_corpus(path: &Path, records: &[MutationRecord]) -> Result<(), CorpusError> {
    let write_err = |source: io::Error| CorpusError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    {
        let mut out = io::BufWriter::new(tmp.as_file_mut());
        for record in records {
            serde_json::to_writer(&mut out, record).map_err(|e| write_err(e.into()))?;
            out.write_all(b"\n").map_err(write_err)?;
        }
        out.flush().map_err(write_err)?;
    }
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    debug!(path = %path.display(), count = records.len(), "Saved corpus");
    Ok(())
}

/// First `cap` characters of `output`.
pub fn truncate_output(output: &str, cap: usize) -> String {
    match output.char_indices().nth(cap) {
        Some((idx, _)) => output[..idx].to_string(),
        None => output.to_string(),
    }
}

/// Local ISO-8601 timestamp with microseconds.
pub fn now_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_output() {
        assert_eq!(truncate_output("ok", 500), "ok");
        assert_eq!(truncate_output("", 500), "");
    }

    #[test]
    fn truncate_cuts_to_exact_cap() {
        let long = "x".repeat(750);
        assert_eq!(truncate_output(&long, 500).chars().count(), 500);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(10);
        let t = truncate_output(&s, 3);
        assert_eq!(t, "ééé");
    }

    #[test]
    fn record_requires_mutation_file() {
        let err = serde_json::from_str::<MutationRecord>(r#"{"description":"d"}"#).unwrap_err();
        assert!(err.to_string().contains("mutation_file"));
    }

    #[test]
    fn record_requires_string_description() {
        let err =
            serde_json::from_str::<MutationRecord>(r#"{"mutation_file":"a.diff","description":3}"#)
                .unwrap_err();
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn timestamp_looks_like_iso8601() {
        let ts = now_timestamp();
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, "%Y-%m-%dT%H:%M:%S%.f").is_ok());
    }
}
