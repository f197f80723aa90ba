//! Mutation classification and per-sample CSV emission.
//!
//! Every coordinate key holding both a mutation and an evidence record is
//! resolved against the feature index and the locus alias table, branched by
//! mutation type, and written as one 12-column CSV row.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::gd::{GdTable, Mutation, Slot};
use crate::genbank::LocusMap;
use crate::gff::{FeatureIndex, INTERGENIC, NO_VALUE};
use crate::stats::RunStats;

/// Header of the per-sample annotated CSV.
pub const CSV_HEADER: &str =
    "identifier,sequence,position,mutation_type,mutation,seq_change,evidence,locus,old_locus,gene/locus,product,freq";

/// One emitted line of per-sample output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedRow {
    pub identifier: String,
    pub sequence: String,
    pub position: u64,
    /// Long label plus short code, e.g. `deletion (DEL)`
    pub mutation_type: String,
    /// Human-readable change at the nucleotide level, e.g. `A->G`, `-12 bp`
    pub mutation: String,
    /// Derived change description (amino-acid change, gene position, ...)
    pub seq_change: String,
    /// Long evidence label plus code, e.g. `read alignment (RA)`
    pub evidence: String,
    pub locus: String,
    pub old_locus: String,
    /// Gene name for coding sites; the mutation's own alias when intergenic
    pub gene: String,
    pub product: String,
    pub freq: String,
}

impl AnnotatedRow {
    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            self.identifier,
            self.sequence,
            self.position,
            self.mutation_type,
            self.mutation,
            self.seq_change,
            self.evidence,
            self.locus,
            self.old_locus,
            self.gene,
            self.product,
            self.freq
        )
    }
}

/// Long evidence label for a 2-letter code.
pub fn evidence_long(code: &str) -> &'static str {
    match code {
        "RA" => "read alignment",
        "MC" => "missing coverage",
        "JC" => "new junction",
        "UN" => "unknown base",
        _ => "unknown evidence",
    }
}

/// Classifies merged genome diff records against one reference.
pub struct Annotator<'a> {
    /// Written into the first output column (the breseq directory as given)
    pub identifier: String,
    pub index: &'a FeatureIndex,
    pub loci: &'a LocusMap,
}

impl<'a> Annotator<'a> {
    pub fn new(identifier: String, index: &'a FeatureIndex, loci: &'a LocusMap) -> Self {
        Annotator {
            identifier,
            index,
            loci,
        }
    }

    /// Classify every merged slot, in table order.
    pub fn annotate_table(&self, table: &GdTable, stats: &mut RunStats) -> Vec<AnnotatedRow> {
        stats.mutation_records = table.mutation_count;
        stats.evidence_records = table.evidence_count;

        let mut rows = Vec::new();
        for (key, slot) in table.iter() {
            if !slot.is_merged() {
                debug!("No merge for coordinate key {key}, skipping");
                continue;
            }
            stats.merged_records += 1;
            match self.classify(slot) {
                Some(row) => {
                    stats.record(slot.mutation.as_ref().map(Mutation::type_code).unwrap_or(""));
                    rows.push(row);
                }
                None => stats.rows_skipped += 1,
            }
        }
        rows
    }

    /// Produce the output row for one merged record, or `None` when the
    /// record is not emittable (ambiguous SNP reference, unknown mutation
    /// type, or an annotation attribute the branch needs is missing).
    pub fn classify(&self, slot: &Slot) -> Option<AnnotatedRow> {
        let mutation = slot.mutation.as_ref()?;
        let evidence = slot.evidence.as_ref()?;

        let contig = mutation.seq_id().to_string();
        let position = mutation.position();
        let locus = self.index.locus_at(&contig, position).to_string();
        let old_locus = self.loci.get(&locus).to_string();
        let coding = locus != INTERGENIC;

        let evidence_label = format!("{} ({})", evidence_long(evidence.code()), evidence.code());

        // An N reference base means the call site itself was ambiguous.
        if matches!(mutation, Mutation::Snp { .. }) && evidence.ref_field() == "N" {
            debug!("Dropping SNP with ambiguous reference at {contig}:{position}");
            return None;
        }

        let missing = |attr: usize| {
            warn!(
                "{} record at {contig}:{position} lacks annotation attribute {attr}, skipping",
                mutation.type_code()
            );
        };

        let (mutation_type, mutation_desc, seq_change, gene, product) = match mutation {
            Mutation::Snp { .. } => {
                let long = "single-nucleotide polymorphism (SNP)".to_string();
                let desc = format!("{}->{}", evidence.ref_field(), evidence.new_field());
                let product = self.index.product_of(&locus).replace(',', ";");
                if coding {
                    // aa_new_seq, aa_position, aa_ref_seq
                    let (Some(new_aa), Some(aa_position), Some(ref_aa)) = (
                        mutation.attr_value(0),
                        mutation.attr_value(1),
                        mutation.attr_value(2),
                    ) else {
                        missing(0);
                        return None;
                    };
                    let change = format!("{ref_aa}{aa_position}{new_aa}");
                    let gene = self.index.gene_of(&locus).to_string();
                    (long, desc, change, gene, product)
                } else {
                    // gene_name, gene_position
                    let (Some(alias), Some(change)) =
                        (mutation.attr_value(0), mutation.attr_value(1))
                    else {
                        missing(0);
                        return None;
                    };
                    (long, desc, change.to_string(), alias.to_string(), product)
                }
            }
            Mutation::Ins { new_seq, .. } => {
                let long = "insertion (INS)".to_string();
                let desc = format!("->{new_seq}");
                // gene_name, gene_position, gene_product; the coding and
                // intergenic branches read the same fields
                let (Some(gene), Some(change), Some(product)) = (
                    mutation.attr_value(0),
                    mutation.attr_value(1),
                    mutation.attr_value(2),
                ) else {
                    missing(0);
                    return None;
                };
                (
                    long,
                    desc,
                    change.to_string(),
                    gene.to_string(),
                    product.to_string(),
                )
            }
            Mutation::Del { size, .. } => {
                let long = "deletion (DEL)".to_string();
                let desc = format!("-{size} bp");
                let (Some(gene), Some(change), Some(product)) = (
                    mutation.attr_value(0),
                    mutation.attr_value(1),
                    mutation.attr_value(2),
                ) else {
                    missing(0);
                    return None;
                };
                (
                    long,
                    desc,
                    change.to_string(),
                    gene.to_string(),
                    product.to_string(),
                )
            }
            Mutation::Sub { size, new_seq, .. } => {
                let long = "multiple base substitution (SUB)".to_string();
                if coding {
                    let (Some(gene), Some(product)) =
                        (mutation.attr_value(0), mutation.attr_value(1))
                    else {
                        missing(0);
                        return None;
                    };
                    let desc = format!("-{size} bp(->+{new_seq})");
                    let change = format!("(->+{new_seq})");
                    (long, desc, change, gene.to_string(), product.to_string())
                } else {
                    // Intergenic SUBs report the raw key=value token as the
                    // change, unlike the coding branch. Long-standing output
                    // format, kept as-is.
                    let (Some(change), Some(alias)) =
                        (mutation.attr_raw(1), mutation.attr_value(1))
                    else {
                        missing(1);
                        return None;
                    };
                    let desc = format!("-{size} bp({new_seq})");
                    (
                        long,
                        desc,
                        change.to_string(),
                        alias.to_string(),
                        NO_VALUE.to_string(),
                    )
                }
            }
            Mutation::Other { code, .. } => {
                debug!("Dropping unhandled mutation type {code} at {contig}:{position}");
                return None;
            }
        };

        Some(AnnotatedRow {
            identifier: self.identifier.clone(),
            sequence: contig,
            position,
            mutation_type,
            mutation: mutation_desc,
            seq_change,
            evidence: evidence_label,
            locus,
            old_locus,
            gene,
            product,
            freq: slot.frequency.to_string(),
        })
    }
}

/// Write the per-sample annotated CSV (header plus one line per row).
pub fn write_sample_csv(path: &Path, rows: &[AnnotatedRow]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "{CSV_HEADER}")?;
    for row in rows {
        writeln!(writer, "{}", row.to_csv())?;
    }
    writer.flush()?;

    info!("Wrote {} annotated mutations to {}", rows.len(), path.display());
    Ok(())
}
