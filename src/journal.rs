//! Append-only journal of consensus reports.
//!
//! Each line is a JSON object holding one report and a BLAKE2b-256 digest of
//! its canonical encoding, so a journal can be audited for tampering after the
//! fact. Metrics are written as shortest round-trip decimals and parsed with
//! serde_json's exact float parser (`float_roundtrip`), so re-encoding a
//! parsed line reproduces its digest and the sum-to-one invariant stays
//! checkable from the journal alone.

use crate::{
    decision::ConsensusStatus,
    error::{QuorumError, Result},
    service::ConsensusReport,
};
use blake2::digest::{consts::U32, Digest};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    fs::{self, create_dir_all, OpenOptions},
    hash::Hash,
    io::{BufWriter, Write},
    path::Path,
};

type Blake2b256 = blake2::Blake2b<U32>;

const JOURNAL_DOMAIN: &[u8] = b"CREDENCE_JOURNAL";

/// One result's metric as written to the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMetric {
    /// Display form of the result value.
    pub result: String,
    /// Posterior confidence.
    pub metric: f64,
}

/// A consensus report flattened to strings for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Display form of the task identifier.
    pub task: String,
    /// Decision state at the time of writing.
    pub status: ConsensusStatus,
    /// Accepted result, if any.
    pub accepted: Option<String>,
    /// Metrics by descending value; ties ordered by result text.
    pub metrics: Vec<RankedMetric>,
    /// Probability that no result is correct.
    pub residual: Option<f64>,
    /// Distinct voters considered.
    pub votes: usize,
}

#[derive(Serialize, Deserialize)]
struct JournalLine {
    #[serde(flatten)]
    record: JournalRecord,
    digest: String,
}

impl JournalRecord {
    /// Captures a report for `task`.
    pub fn from_report<T, R>(task: &T, report: &ConsensusReport<R>) -> Self
    where
        T: Display + ?Sized,
        R: Display + Eq + Hash + Clone,
    {
        let mut metrics: Vec<RankedMetric> = report
            .metrics
            .iter()
            .map(|(result, metric)| RankedMetric {
                result: result.to_string(),
                metric: *metric,
            })
            .collect();
        metrics.sort_by(|a, b| {
            b.metric
                .total_cmp(&a.metric)
                .then_with(|| a.result.cmp(&b.result))
        });
        Self {
            task: task.to_string(),
            status: report.status,
            accepted: report.accepted.as_ref().map(ToString::to_string),
            metrics,
            residual: report.residual,
            votes: report.votes,
        }
    }

    /// Sum of metrics and residual.
    pub fn total(&self) -> f64 {
        self.metrics.iter().map(|m| m.metric).sum::<f64>() + self.residual.unwrap_or(0.0)
    }
}

/// Hex BLAKE2b-256 digest of a record's canonical JSON encoding.
pub fn compute_digest(record: &JournalRecord) -> Result<String> {
    let body = serde_json::to_vec(record)?;
    let mut hasher = Blake2b256::new();
    hasher.update(JOURNAL_DOMAIN);
    hasher.update((body.len() as u64).to_be_bytes());
    hasher.update(&body);
    Ok(hex::encode(hasher.finalize()))
}

/// Encodes a record as a single journal line (without newline).
pub fn encode_line(record: &JournalRecord) -> Result<String> {
    let line = JournalLine {
        digest: compute_digest(record)?,
        record: record.clone(),
    };
    Ok(serde_json::to_string(&line)?)
}

/// Parses a journal line and checks its digest.
pub fn verify_journal_line(line: &str) -> Result<JournalRecord> {
    let parsed: JournalLine = serde_json::from_str(line)?;
    let computed = compute_digest(&parsed.record)?;
    if computed != parsed.digest {
        return Err(QuorumError::Journal(format!(
            "digest mismatch for task {}",
            parsed.record.task
        )));
    }
    Ok(parsed.record)
}

/// Appends records to the journal at `path`, creating it if needed.
pub fn append_records(path: &Path, records: &[JournalRecord]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        writer.write_all(encode_line(record)?.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(records.len())
}

/// Reads and verifies every record of a journal.
///
/// Blank lines and lines starting with `#` are skipped. The first invalid
/// line aborts with its 1-based line number.
pub fn read_journal(path: &Path) -> Result<Vec<JournalRecord>> {
    let contents = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record = verify_journal_line(line)
            .map_err(|err| QuorumError::Journal(format!("line {}: {err}", index + 1)))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn sample_report() -> ConsensusReport<char> {
        ConsensusReport {
            status: ConsensusStatus::Accepted,
            accepted: Some('Z'),
            metrics: HashMap::from([('Z', 0.998_979_4), ('M', 0.000_951_3)]),
            residual: Some(0.000_069_3),
            votes: 3,
        }
    }

    #[test]
    fn record_ranks_metrics() {
        let record = JournalRecord::from_report("task-1", &sample_report());
        assert_eq!(record.task, "task-1");
        assert_eq!(record.accepted.as_deref(), Some("Z"));
        assert_eq!(record.metrics[0].result, "Z");
        assert_eq!(record.metrics[1].result, "M");
    }

    #[test]
    fn lines_verify_and_preserve_precision() {
        let record = JournalRecord::from_report(&7u32, &sample_report());
        let line = encode_line(&record).unwrap();
        let parsed = verify_journal_line(&line).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(
            parsed.metrics[0].metric.to_bits(),
            record.metrics[0].metric.to_bits()
        );
    }

    #[test]
    fn tampering_is_detected() {
        let record = JournalRecord::from_report("t", &sample_report());
        let line = encode_line(&record).unwrap();
        let forged = line.replace("\"accepted\":\"Z\"", "\"accepted\":\"M\"");
        assert_ne!(forged, line);
        assert!(matches!(
            verify_journal_line(&forged),
            Err(QuorumError::Journal(_))
        ));
    }

    #[test]
    fn journal_file_round_trip() {
        let base = std::env::temp_dir();
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = base.join(format!("credence_journal_{unique}"));
        let path = dir.join("outcomes.jsonl");
        let first = JournalRecord::from_report("a", &sample_report());
        let second = JournalRecord::from_report("b", &sample_report());
        append_records(&path, &[first.clone()]).unwrap();
        append_records(&path, &[second.clone()]).unwrap();
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.insert_str(0, "# audit copy\n\n");
        fs::write(&path, contents).unwrap();

        let records = read_journal(&path).unwrap();
        assert_eq!(records, vec![first, second]);
        fs::remove_dir_all(&dir).unwrap();
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn arbitrary_metrics_verify(
                metrics in prop::collection::vec(prop::num::f64::POSITIVE | prop::num::f64::NORMAL, 1..6),
                residual in 0.0f64..1.0,
            ) {
                let record = JournalRecord {
                    task: "wu".to_string(),
                    status: ConsensusStatus::Indeterminate,
                    accepted: None,
                    metrics: metrics
                        .iter()
                        .enumerate()
                        .map(|(index, metric)| RankedMetric {
                            result: index.to_string(),
                            metric: *metric,
                        })
                        .collect(),
                    residual: Some(residual),
                    votes: metrics.len(),
                };
                let line = encode_line(&record).unwrap();
                let parsed = verify_journal_line(&line).unwrap();
                for (read, written) in parsed.metrics.iter().zip(&record.metrics) {
                    prop_assert_eq!(read.metric.to_bits(), written.metric.to_bits());
                }
                prop_assert_eq!(parsed, record);
            }
        }
    }
}
