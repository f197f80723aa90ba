//! Genome diff (`annotated.gd`) loading and mutation/evidence merging.
//!
//! breseq genome diff lines are tab-separated; the first field is a type code.
//! Three-letter codes are mutation predictions (SNP, INS, DEL, SUB, ...),
//! two-letter codes are the supporting evidence (RA, MC, JC; UN carries no
//! mutation linkage and is never indexed). Mutations and evidence are merged
//! under a `contig|position` coordinate key; evidence types that anchor at a
//! different field (missing-coverage end range, junction side 2) fall back to
//! that alternate coordinate when the primary key has no mutation.

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// breseq run mode; selects how the frequency column is filled.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Consensus (clone) run: frequency is reported as NA
    Clone,
    /// Population run: per-mutation frequency percentages
    PolymorphismPrediction,
}

/// Genome diff fields beyond this column are never consumed downstream.
const FIELD_LIMIT: usize = 10;

/// A mutation prediction, tagged by its 3-letter type code.
///
/// `attrs` holds the trailing `key=value` annotation tokens (through the
/// field limit), positionally aligned with the source line. Their meaning
/// depends on whether the site is coding or intergenic, so they are decoded
/// at classification time.
#[derive(Debug, Clone, Serialize)]
pub enum Mutation {
    Snp {
        seq_id: String,
        position: u64,
        new_base: String,
        attrs: Vec<String>,
    },
    Ins {
        seq_id: String,
        position: u64,
        new_seq: String,
        attrs: Vec<String>,
    },
    Del {
        seq_id: String,
        position: u64,
        size: String,
        attrs: Vec<String>,
    },
    Sub {
        seq_id: String,
        position: u64,
        size: String,
        new_seq: String,
        attrs: Vec<String>,
    },
    /// Recognized as a mutation record but never emitted (MOB, AMP, ...).
    Other {
        code: String,
        seq_id: String,
        position: u64,
    },
}

impl Mutation {
    /// Parse one tab-split mutation line. Returns `None` when the positional
    /// core is incomplete; the row is dropped, never the run.
    pub fn parse(fields: &[&str]) -> Option<Mutation> {
        let code = *fields.first()?;
        let seq_id = escape(fields.get(3)?);
        let position: u64 = fields.get(4)?.parse().ok()?;

        let record = match code {
            "SNP" => Mutation::Snp {
                seq_id,
                position,
                new_base: escape(fields.get(5)?),
                attrs: collect_attrs(fields, 6),
            },
            "INS" => Mutation::Ins {
                seq_id,
                position,
                new_seq: escape(fields.get(5)?),
                attrs: collect_attrs(fields, 6),
            },
            "DEL" => Mutation::Del {
                seq_id,
                position,
                size: escape(fields.get(5)?),
                attrs: collect_attrs(fields, 6),
            },
            "SUB" => Mutation::Sub {
                seq_id,
                position,
                size: escape(fields.get(5)?),
                new_seq: escape(fields.get(6)?),
                attrs: collect_attrs(fields, 7),
            },
            _ => Mutation::Other {
                code: code.to_string(),
                seq_id,
                position,
            },
        };
        Some(record)
    }

    pub fn type_code(&self) -> &str {
        match self {
            Mutation::Snp { .. } => "SNP",
            Mutation::Ins { .. } => "INS",
            Mutation::Del { .. } => "DEL",
            Mutation::Sub { .. } => "SUB",
            Mutation::Other { code, .. } => code,
        }
    }

    pub fn seq_id(&self) -> &str {
        match self {
            Mutation::Snp { seq_id, .. }
            | Mutation::Ins { seq_id, .. }
            | Mutation::Del { seq_id, .. }
            | Mutation::Sub { seq_id, .. }
            | Mutation::Other { seq_id, .. } => seq_id,
        }
    }

    pub fn position(&self) -> u64 {
        match self {
            Mutation::Snp { position, .. }
            | Mutation::Ins { position, .. }
            | Mutation::Del { position, .. }
            | Mutation::Sub { position, .. }
            | Mutation::Other { position, .. } => *position,
        }
    }

    pub fn coordinate_key(&self) -> String {
        format!("{}|{}", self.seq_id(), self.position())
    }

    fn attrs(&self) -> &[String] {
        match self {
            Mutation::Snp { attrs, .. }
            | Mutation::Ins { attrs, .. }
            | Mutation::Del { attrs, .. }
            | Mutation::Sub { attrs, .. } => attrs.as_slice(),
            Mutation::Other { .. } => &[],
        }
    }

    /// The i-th annotation token, verbatim (`key=value`).
    pub fn attr_raw(&self, index: usize) -> Option<&str> {
        self.attrs().get(index).map(String::as_str)
    }

    /// The value part of the i-th annotation token.
    pub fn attr_value(&self, index: usize) -> Option<&str> {
        self.attrs().get(index)?.split('=').nth(1)
    }
}

/// A supporting evidence record, tagged by its 2-letter code.
#[derive(Debug, Clone, Serialize)]
pub enum Evidence {
    /// RA: read alignment evidence anchored at the call position.
    ReadAlignment {
        seq_id: String,
        position: String,
        ref_base: String,
        new_base: String,
    },
    /// MC: missing coverage over a range; merges at the start position or,
    /// failing that, at the end of the uncertainty range.
    MissingCoverage {
        seq_id: String,
        start: String,
        start_range: String,
        end_range: String,
    },
    /// JC: a new junction; side 2 carries the alternate anchor.
    NewJunction {
        seq_id: String,
        position: String,
        side2_seq_id: String,
        side2_position: String,
    },
    /// Any other evidence code, kept for labeling.
    Other {
        code: String,
        seq_id: String,
        position: String,
        field6: String,
        field7: String,
    },
}

impl Evidence {
    /// Parse one tab-split evidence line. Requires the fields up to the
    /// alternate anchor; shorter rows are dropped.
    pub fn parse(fields: &[&str]) -> Option<Evidence> {
        let code = *fields.first()?;
        let seq_id = escape(fields.get(3)?);
        let position = escape(fields.get(4)?);
        let field6 = escape(fields.get(6)?);
        let field7 = escape(fields.get(7)?);

        let record = match code {
            "RA" => Evidence::ReadAlignment {
                seq_id,
                position,
                ref_base: field6,
                new_base: field7,
            },
            "MC" => Evidence::MissingCoverage {
                seq_id,
                start: position,
                start_range: field6,
                end_range: field7,
            },
            "JC" => Evidence::NewJunction {
                seq_id,
                position,
                side2_seq_id: field6,
                side2_position: field7,
            },
            _ => Evidence::Other {
                code: code.to_string(),
                seq_id,
                position,
                field6,
                field7,
            },
        };
        Some(record)
    }

    pub fn code(&self) -> &str {
        match self {
            Evidence::ReadAlignment { .. } => "RA",
            Evidence::MissingCoverage { .. } => "MC",
            Evidence::NewJunction { .. } => "JC",
            Evidence::Other { code, .. } => code,
        }
    }

    pub fn seq_id(&self) -> &str {
        match self {
            Evidence::ReadAlignment { seq_id, .. }
            | Evidence::MissingCoverage { seq_id, .. }
            | Evidence::NewJunction { seq_id, .. }
            | Evidence::Other { seq_id, .. } => seq_id,
        }
    }

    /// Key at the record's own coordinate field.
    pub fn primary_key(&self) -> String {
        let position = match self {
            Evidence::ReadAlignment { position, .. }
            | Evidence::NewJunction { position, .. }
            | Evidence::Other { position, .. } => position,
            Evidence::MissingCoverage { start, .. } => start,
        };
        format!("{}|{}", self.seq_id(), position)
    }

    /// Key at the alternate anchor field, tried when the primary key has no
    /// mutation stored.
    pub fn fallback_key(&self) -> String {
        let anchor = match self {
            Evidence::ReadAlignment { new_base, .. } => new_base,
            Evidence::MissingCoverage { end_range, .. } => end_range,
            Evidence::NewJunction { side2_position, .. } => side2_position,
            Evidence::Other { field7, .. } => field7,
        };
        format!("{}|{}", self.seq_id(), anchor)
    }

    /// Field 6: the reference base for read alignments.
    pub fn ref_field(&self) -> &str {
        match self {
            Evidence::ReadAlignment { ref_base, .. } => ref_base,
            Evidence::MissingCoverage { start_range, .. } => start_range,
            Evidence::NewJunction { side2_seq_id, .. } => side2_seq_id,
            Evidence::Other { field6, .. } => field6,
        }
    }

    /// Field 7: the new base for read alignments.
    pub fn new_field(&self) -> &str {
        match self {
            Evidence::ReadAlignment { new_base, .. } => new_base,
            Evidence::MissingCoverage { end_range, .. } => end_range,
            Evidence::NewJunction { side2_position, .. } => side2_position,
            Evidence::Other { field7, .. } => field7,
        }
    }
}

/// Mutation frequency carried into the output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub enum Frequency {
    /// Consensus runs carry no frequency.
    #[default]
    Na,
    /// Population runs: fraction from the `frequency=` attribute, as a
    /// percentage.
    Percent(f64),
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Na => write!(f, "NA"),
            Frequency::Percent(value) => write!(f, "{value}"),
        }
    }
}

/// Mutation and evidence stored under one coordinate key.
#[derive(Debug, Default)]
pub struct Slot {
    pub mutation: Option<Mutation>,
    pub evidence: Option<Evidence>,
    pub frequency: Frequency,
}

impl Slot {
    /// A slot only classifies once both halves are present.
    pub fn is_merged(&self) -> bool {
        self.mutation.is_some() && self.evidence.is_some()
    }
}

/// Coordinate-keyed merge of a genome diff file.
///
/// Keys keep their first-insertion order so repeated runs over the same input
/// emit rows in the same order.
#[derive(Debug, Default)]
pub struct GdTable {
    order: Vec<String>,
    slots: HashMap<String, Slot>,
    pub mutation_count: usize,
    pub evidence_count: usize,
}

impl GdTable {
    fn slot_mut(&mut self, key: String) -> &mut Slot {
        if !self.slots.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.slots.entry(key).or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Slot> {
        self.slots.get(key)
    }

    /// Slots in first-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Slot)> {
        self.order
            .iter()
            .map(move |key| (key.as_str(), &self.slots[key]))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Load and merge a genome diff file.
pub fn load_gd<P: AsRef<Path>>(path: P, mode: Mode) -> Result<GdTable> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open genome diff file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut table = GdTable::default();

    for line in reader.lines() {
        let line = line?;
        if line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let Some(code) = fields.first() else { continue };

        if code.len() == 3 {
            let Some(mutation) = Mutation::parse(&fields) else {
                warn!("Skipping malformed mutation record: {line}");
                continue;
            };
            let frequency = match mode {
                Mode::PolymorphismPrediction => match parse_frequency(&line) {
                    Some(fraction) => Frequency::Percent(fraction * 100.0),
                    None => {
                        warn!("Mutation record without frequency= attribute: {line}");
                        continue;
                    }
                },
                Mode::Clone => Frequency::Na,
            };
            let key = mutation.coordinate_key();
            let slot = table.slot_mut(key);
            slot.mutation = Some(mutation);
            slot.frequency = frequency;
            table.mutation_count += 1;
        } else if code.len() == 2 && *code != "UN" {
            let Some(evidence) = Evidence::parse(&fields) else {
                warn!("Skipping malformed evidence record: {line}");
                continue;
            };
            let mut key = evidence.primary_key();
            if table.get(&key).is_none() {
                key = evidence.fallback_key();
            }
            table.slot_mut(key).evidence = Some(evidence);
            table.evidence_count += 1;
        }
    }

    info!(
        "Loaded {} mutation and {} evidence records ({} coordinate keys) from {}",
        table.mutation_count,
        table.evidence_count,
        table.len(),
        path.display()
    );
    Ok(table)
}

/// Fraction from the line's `frequency=` attribute.
fn parse_frequency(line: &str) -> Option<f64> {
    let (_, rest) = line.split_once("frequency=")?;
    rest.split('\t').next()?.parse().ok()
}

/// Commas inside stored tokens would break the CSV output downstream.
fn escape(field: &str) -> String {
    field.replace(',', ";")
}

/// Annotation tokens from `start` through the field limit, comma-escaped.
fn collect_attrs(fields: &[&str], start: usize) -> Vec<String> {
    let end = fields.len().min(FIELD_LIMIT);
    if start >= end {
        return Vec::new();
    }
    fields[start..end].iter().map(|f| escape(f)).collect()
}
