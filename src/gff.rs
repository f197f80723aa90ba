//! GFF annotation parsing and the position→feature index.
//!
//! breseq copies the annotation it ran against into `data/reference.gff3`.
//! Every CDS interval is expanded into a per-contig position→alias map so a
//! mutation coordinate resolves to its coding feature with a single lookup.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Sentinel for positions not covered by any CDS.
pub const INTERGENIC: &str = "intergenic";

/// Placeholder written when a field has no real value.
pub const NO_VALUE: &str = "-";

/// Gene symbol and product description for one feature alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureMeta {
    /// Gene name (from the `Name=` attribute)
    pub gene: String,
    /// Product description (from the `Note=` attribute)
    pub product: String,
}

/// Position→alias index over all contigs, plus per-alias metadata.
///
/// Overlapping CDS intervals overwrite earlier ones position-by-position in
/// input order (last wins), matching how the index is consumed downstream.
#[derive(Debug, Default)]
pub struct FeatureIndex {
    /// contig → (1-based position → feature alias)
    positions: HashMap<String, HashMap<u64, String>>,
    /// alias → gene/product text
    meta: HashMap<String, FeatureMeta>,
}

impl FeatureIndex {
    /// Parse a GFF3 file and build the index.
    ///
    /// Only `CDS` rows are indexed; a `##FASTA` marker ends parsing. With
    /// `external_annotation` set, gene/product are stored as `-` placeholders
    /// (the run was annotated against a user-supplied GFF, so only the
    /// interval→alias mapping is meaningful here).
    pub fn from_file<P: AsRef<Path>>(path: P, external_annotation: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open GFF file: {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut index = FeatureIndex::default();

        for line in reader.lines() {
            let line = line?;
            if line.starts_with("##FASTA") {
                break; // sequence section, annotation is done
            }
            if line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 9 || fields[2] != "CDS" {
                continue;
            }

            let Some(alias) = first_attribute_value(fields[8]) else {
                debug!("Skipping CDS row without an ID attribute: {line}");
                continue;
            };

            let meta = if external_annotation {
                FeatureMeta {
                    gene: NO_VALUE.to_string(),
                    product: NO_VALUE.to_string(),
                }
            } else {
                let (Some(name), Some(product)) = (
                    attribute_value(fields[8], "Name="),
                    attribute_value(fields[8], "Note="),
                ) else {
                    debug!("Skipping CDS row with incomplete attributes: {line}");
                    continue;
                };
                // The legacy Name-vs-alias fallback resolved to the Name
                // token on both branches; that is the behavior kept here.
                FeatureMeta {
                    gene: name.to_string(),
                    product: product.to_string(),
                }
            };

            let (Ok(start), Ok(end)) = (fields[3].parse::<u64>(), fields[4].parse::<u64>()) else {
                debug!("Skipping CDS row with non-numeric coordinates: {line}");
                continue;
            };

            let contig = index.positions.entry(fields[0].to_string()).or_default();
            for position in start..=end {
                contig.insert(position, alias.to_string());
            }
            index.meta.insert(alias.to_string(), meta);
        }

        info!(
            "Indexed {} CDS features across {} contigs from {}",
            index.feature_count(),
            index.positions.len(),
            path.display()
        );
        Ok(index)
    }

    /// Resolve a coordinate to its feature alias, or `intergenic`.
    pub fn locus_at(&self, contig: &str, position: u64) -> &str {
        self.positions
            .get(contig)
            .and_then(|p| p.get(&position))
            .map(String::as_str)
            .unwrap_or(INTERGENIC)
    }

    /// Gene name for an alias; unknown aliases resolve to `intergenic`.
    pub fn gene_of(&self, alias: &str) -> &str {
        self.meta
            .get(alias)
            .map(|m| m.gene.as_str())
            .unwrap_or(INTERGENIC)
    }

    /// Product description for an alias; unknown aliases resolve to `intergenic`.
    pub fn product_of(&self, alias: &str) -> &str {
        self.meta
            .get(alias)
            .map(|m| m.product.as_str())
            .unwrap_or(INTERGENIC)
    }

    /// Number of indexed features.
    pub fn feature_count(&self) -> usize {
        self.meta.len()
    }
}

/// Value of the first `;`-separated attribute token (`ID=cds1;...` → `cds1`).
fn first_attribute_value(attributes: &str) -> Option<&str> {
    let first = attributes.split(';').next()?;
    first.split('=').nth(1)
}

/// Value following `key=` up to the next `;`, anywhere in the attribute string.
fn attribute_value<'a>(attributes: &'a str, key: &str) -> Option<&'a str> {
    let (_, rest) = attributes.split_once(key)?;
    rest.split(';').next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_gff(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const BASIC: &str = "##gff-version 3\n\
        contig1\t.\tCDS\t100\t200\t.\t+\t0\tID=cds1;Name=geneA;Note=enzyme X\n\
        contig1\t.\tgene\t100\t200\t.\t+\t.\tID=gene1;Name=geneA\n";

    #[test]
    fn every_position_in_range_resolves_inclusive() {
        let file = write_gff(BASIC);
        let index = FeatureIndex::from_file(file.path(), false).unwrap();

        for pos in [100, 150, 200] {
            assert_eq!(index.locus_at("contig1", pos), "cds1");
        }
        assert_eq!(index.locus_at("contig1", 99), INTERGENIC);
        assert_eq!(index.locus_at("contig1", 201), INTERGENIC);
        assert_eq!(index.locus_at("contig2", 150), INTERGENIC);
    }

    #[test]
    fn gene_and_product_come_from_attributes() {
        let file = write_gff(BASIC);
        let index = FeatureIndex::from_file(file.path(), false).unwrap();

        assert_eq!(index.gene_of("cds1"), "geneA");
        assert_eq!(index.product_of("cds1"), "enzyme X");
        assert_eq!(index.gene_of("nope"), INTERGENIC);
        assert_eq!(index.product_of("nope"), INTERGENIC);
    }

    #[test]
    fn non_cds_rows_are_ignored() {
        let gff = "contig1\t.\tgene\t100\t200\t.\t+\t.\tID=gene1;Name=geneA;Note=x\n";
        let file = write_gff(gff);
        let index = FeatureIndex::from_file(file.path(), false).unwrap();
        assert_eq!(index.feature_count(), 0);
    }

    #[test]
    fn fasta_marker_ends_parsing() {
        let gff = "##FASTA\n\
            contig1\t.\tCDS\t100\t200\t.\t+\t0\tID=cds1;Name=geneA;Note=x\n";
        let file = write_gff(gff);
        let index = FeatureIndex::from_file(file.path(), false).unwrap();
        assert_eq!(index.feature_count(), 0);
    }

    #[test]
    fn malformed_attribute_rows_are_skipped() {
        let gff = "contig1\t.\tCDS\t100\t200\t.\t+\t0\tID=cds1\n\
            contig1\t.\tCDS\t300\t400\t.\t+\t0\tID=cds2;Name=geneB;Note=ok\n";
        let file = write_gff(gff);
        let index = FeatureIndex::from_file(file.path(), false).unwrap();

        // cds1 lacks Name=/Note= and is dropped entirely, build continues
        assert_eq!(index.locus_at("contig1", 150), INTERGENIC);
        assert_eq!(index.locus_at("contig1", 350), "cds2");
    }

    #[test]
    fn external_annotation_indexes_intervals_with_placeholders() {
        let gff = "contig1\t.\tCDS\t100\t200\t.\t+\t0\tID=cds1\n";
        let file = write_gff(gff);
        let index = FeatureIndex::from_file(file.path(), true).unwrap();

        assert_eq!(index.locus_at("contig1", 150), "cds1");
        assert_eq!(index.gene_of("cds1"), NO_VALUE);
        assert_eq!(index.product_of("cds1"), NO_VALUE);
    }

    #[test]
    fn overlapping_features_overwrite_positionally() {
        let gff = "contig1\t.\tCDS\t100\t200\t.\t+\t0\tID=cds1;Name=geneA;Note=x\n\
            contig1\t.\tCDS\t150\t250\t.\t+\t0\tID=cds2;Name=geneB;Note=y\n";
        let file = write_gff(gff);
        let index = FeatureIndex::from_file(file.path(), false).unwrap();

        assert_eq!(index.locus_at("contig1", 120), "cds1");
        assert_eq!(index.locus_at("contig1", 150), "cds2");
        assert_eq!(index.locus_at("contig1", 250), "cds2");
    }
}
