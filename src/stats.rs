//! Run statistics for the annotate subcommand.
//!
//! Optional JSON summary so pipeline wrappers can sanity-check a run without
//! re-counting output rows.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Counters for one annotate run.
#[derive(Debug, Default, Serialize)]
pub struct RunStats {
    /// Sample name (last component of the breseq directory)
    pub sample: String,
    /// Mutation records parsed from the genome diff
    pub mutation_records: usize,
    /// Evidence records parsed (UN excluded)
    pub evidence_records: usize,
    /// Coordinate keys holding both a mutation and evidence
    pub merged_records: usize,
    /// Rows written to the per-sample CSV
    pub rows_emitted: usize,
    pub snp: usize,
    pub ins: usize,
    pub del: usize,
    pub sub: usize,
    /// Merged records dropped (ambiguous reference, unknown type, bad arity)
    pub rows_skipped: usize,
}

impl RunStats {
    pub fn new(sample: String) -> Self {
        RunStats {
            sample,
            ..Default::default()
        }
    }

    /// Count one emitted row by its mutation type code.
    pub fn record(&mut self, type_code: &str) {
        self.rows_emitted += 1;
        match type_code {
            "SNP" => self.snp += 1,
            "INS" => self.ins += 1,
            "DEL" => self.del += 1,
            "SUB" => self.sub += 1,
            _ => {}
        }
    }

    /// Serialize to pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write stats file: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tallies_per_type() {
        let mut stats = RunStats::new("s1".to_string());
        stats.record("SNP");
        stats.record("SNP");
        stats.record("DEL");

        assert_eq!(stats.rows_emitted, 3);
        assert_eq!(stats.snp, 2);
        assert_eq!(stats.del, 1);
        assert_eq!(stats.ins, 0);
    }

    #[test]
    fn save_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = RunStats::new("s1".to_string());
        stats.save(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["sample"], "s1");
        assert_eq!(json["rows_emitted"], 0);
    }
}
