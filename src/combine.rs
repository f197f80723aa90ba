//! Cross-sample aggregation of per-sample annotated CSVs.
//!
//! Scans a directory of annotate outputs and writes two files back into it:
//! `detailed_summary.csv`, the concatenation of every sample's rows under a
//! single header, and `mutations_profile.csv`, a locus-by-sample matrix. In
//! clone mode a matrix cell holds the mutation description; in population
//! mode it holds the frequency percentage.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::gd::Mode;
use crate::gff::{INTERGENIC, NO_VALUE};

/// Combined detail output filename.
pub const DETAIL_FILE: &str = "detailed_summary.csv";

/// Locus-by-sample matrix filename.
pub const MATRIX_FILE: &str = "mutations_profile.csv";

/// Locus sentinel produced when a call sits in a coverage gap; such rows are
/// pipeline artifacts, not genes.
const MISSING_COVERAGE_LOCUS: &str = "missing coverage (MC)";

/// Output names (ours and downstream plotting steps') never treated as samples.
const RESERVED: [&str; 6] = [
    MATRIX_FILE,
    DETAIL_FILE,
    "mutations_profile-melt.csv",
    "mutations_profile-filtered.csv",
    "mutations_profile.pdf",
    "mutations_profile.tiff",
];

/// Gene/product/old-locus metadata recorded per locus (last sample wins).
#[derive(Debug, Clone)]
struct LocusMeta {
    gene: String,
    product: String,
    old_locus: String,
}

/// Aggregate the samples found in `dir`, in directory-listing order.
///
/// Matrix column order follows the listing order; a stable listing is the
/// caller's concern (spelled out for reproducible reruns).
pub fn run(dir: &Path, mode: Mode) -> Result<()> {
    let samples = sample_files(dir)?;
    info!("Combining {} per-sample files from {}", samples.len(), dir.display());
    combine_samples(dir, &samples, mode)
}

/// Sample CSVs in `dir`: every `.csv` that is not a reserved output name.
pub fn sample_files(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read input directory: {}", dir.display()))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".csv") && !RESERVED.contains(&name.as_str()) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Build both outputs from an explicit, ordered sample list.
pub fn combine_samples(dir: &Path, samples: &[String], mode: Mode) -> Result<()> {
    let detail_path = dir.join(DETAIL_FILE);
    let detail_file = File::create(&detail_path)
        .with_context(|| format!("Failed to create {}", detail_path.display()))?;
    let mut detail = BufWriter::new(detail_file);
    let mut header_written = false;

    // locus → metadata, (locus, sample stem) → cell value
    let mut meta: HashMap<String, LocusMeta> = HashMap::new();
    let mut cells: HashMap<(String, String), String> = HashMap::new();
    let mut locus_order: Vec<String> = Vec::new();
    let mut in_matrix: HashSet<String> = HashSet::new();

    let pb = ProgressBar::new(samples.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} samples")
            .unwrap()
            .progress_chars("=>-"),
    );

    for name in samples {
        let stem = file_stem(name);
        let path = dir.join(name);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open sample file: {}", path.display()))?;

        for line in BufReader::new(file).lines() {
            let line = line?;
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 12 {
                warn!("Skipping short row in {name}: {line}");
                continue;
            }

            if fields[7] == "locus" {
                // header row; pass the first one through to the detail file
                if !header_written {
                    writeln!(detail, "{line}")?;
                    header_written = true;
                }
                continue;
            }

            let locus = strip_brackets(fields[7]);
            let old_locus = strip_brackets(fields[8]);
            if locus == MISSING_COVERAGE_LOCUS || old_locus == MISSING_COVERAGE_LOCUS {
                continue;
            }

            meta.insert(
                locus.clone(),
                LocusMeta {
                    gene: strip_brackets(fields[9]),
                    product: strip_brackets(fields[10]),
                    old_locus,
                },
            );
            writeln!(detail, "{line}")?;

            if locus != INTERGENIC {
                let value = match mode {
                    Mode::Clone => fields[4].split(" (").next().unwrap_or("").to_string(),
                    Mode::PolymorphismPrediction => fields[11].to_string(),
                };
                if in_matrix.insert(locus.clone()) {
                    locus_order.push(locus.clone());
                }
                cells.insert((locus, stem.clone()), value);
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    detail.flush()?;

    write_matrix(dir, samples, mode, &locus_order, &meta, &cells)?;

    info!(
        "Wrote {} and {} ({} loci, {} samples)",
        DETAIL_FILE,
        MATRIX_FILE,
        locus_order.len(),
        samples.len()
    );
    Ok(())
}

fn write_matrix(
    dir: &Path,
    samples: &[String],
    mode: Mode,
    locus_order: &[String],
    meta: &HashMap<String, LocusMeta>,
    cells: &HashMap<(String, String), String>,
) -> Result<()> {
    let matrix_path = dir.join(MATRIX_FILE);
    let matrix_file = File::create(&matrix_path)
        .with_context(|| format!("Failed to create {}", matrix_path.display()))?;
    let mut matrix = BufWriter::new(matrix_file);

    write!(matrix, "locus,old_locus,gene,product")?;
    for name in samples {
        write!(matrix, ",{}", column_label(name))?;
    }
    writeln!(matrix)?;

    for locus in locus_order {
        let m = &meta[locus];
        // Population runs can surface a stray numeric token in the gene
        // column; a value that parses as a number is masked out.
        let gene = match mode {
            Mode::PolymorphismPrediction if m.gene.parse::<f64>().is_ok() => NO_VALUE,
            _ => m.gene.as_str(),
        };
        write!(matrix, "{},{},{},{}", locus, m.old_locus, gene, m.product)?;

        for name in samples {
            let key = (locus.clone(), file_stem(name));
            let value = cells.get(&key).map(String::as_str).unwrap_or(NO_VALUE);
            write!(matrix, ",{value}")?;
        }
        writeln!(matrix)?;
    }
    matrix.flush()?;
    Ok(())
}

/// Filename up to the first dot.
fn file_stem(name: &str) -> String {
    name.split('.').next().unwrap_or(name).to_string()
}

/// Matrix column label: the last underscore-delimited token of the stem.
fn column_label(name: &str) -> &str {
    let stem = name.split('.').next().unwrap_or(name);
    stem.rsplit('_').find(|t| !t.is_empty()).unwrap_or(stem)
}

fn strip_brackets(field: &str) -> String {
    field.chars().filter(|c| *c != '[' && *c != ']').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::CSV_HEADER;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn row(
        sample: &str,
        locus: &str,
        old_locus: &str,
        gene: &str,
        product: &str,
        mutation: &str,
        freq: &str,
    ) -> String {
        format!(
            "{sample},contig1,150,single-nucleotide polymorphism (SNP),{mutation},A50V,read alignment (RA),{locus},{old_locus},{gene},{product},{freq}"
        )
    }

    fn write_sample(dir: &Path, name: &str, rows: &[String]) -> PathBuf {
        let path = dir.join(name);
        let mut content = format!("{CSV_HEADER}\n");
        for r in rows {
            content.push_str(r);
            content.push('\n');
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn setup() -> (TempDir, Vec<String>) {
        let dir = TempDir::new().unwrap();
        write_sample(
            dir.path(),
            "run_s1.csv",
            &[
                row("s1", "cds1", "OLD_1", "geneA", "enzyme X", "A->G", "NA"),
                row("s1", "intergenic", "-", "upA/dnB", "intergenic", "T->C", "NA"),
            ],
        );
        write_sample(
            dir.path(),
            "run_s2.csv",
            &[
                row("s2", "cds1", "OLD_1", "geneA", "enzyme X", "A->T", "NA"),
                row("s2", "cds2", "OLD_2", "geneB", "kinase", "-5 bp", "NA"),
            ],
        );
        let samples = vec!["run_s1.csv".to_string(), "run_s2.csv".to_string()];
        (dir, samples)
    }

    fn read(dir: &Path, name: &str) -> String {
        fs::read_to_string(dir.join(name)).unwrap()
    }

    #[test]
    fn matrix_has_one_column_per_sample_and_dash_for_missing() {
        let (dir, samples) = setup();
        combine_samples(dir.path(), &samples, Mode::Clone).unwrap();

        let matrix = read(dir.path(), MATRIX_FILE);
        let lines: Vec<&str> = matrix.lines().collect();
        assert_eq!(lines[0], "locus,old_locus,gene,product,s1,s2");
        assert_eq!(lines[1], "cds1,OLD_1,geneA,enzyme X,A->G,A->T");
        assert_eq!(lines[2], "cds2,OLD_2,geneB,kinase,-,-5 bp");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn intergenic_rows_stay_out_of_matrix_but_in_detail() {
        let (dir, samples) = setup();
        combine_samples(dir.path(), &samples, Mode::Clone).unwrap();

        let matrix = read(dir.path(), MATRIX_FILE);
        assert!(!matrix.contains(INTERGENIC));

        let detail = read(dir.path(), DETAIL_FILE);
        assert!(detail.contains("intergenic"));
    }

    #[test]
    fn detail_header_appears_exactly_once() {
        let (dir, samples) = setup();
        combine_samples(dir.path(), &samples, Mode::Clone).unwrap();

        let detail = read(dir.path(), DETAIL_FILE);
        assert_eq!(detail.matches(CSV_HEADER).count(), 1);
        assert!(detail.starts_with(CSV_HEADER));
        // 4 data rows follow the shared header
        assert_eq!(detail.lines().count(), 5);
    }

    #[test]
    fn missing_coverage_rows_are_dropped_entirely() {
        let dir = TempDir::new().unwrap();
        write_sample(
            dir.path(),
            "run_s1.csv",
            &[
                row("s1", "missing coverage (MC)", "-", "x", "y", "-5 bp", "NA"),
                row("s1", "cds1", "missing coverage (MC)", "x", "y", "-5 bp", "NA"),
            ],
        );
        let samples = vec!["run_s1.csv".to_string()];
        combine_samples(dir.path(), &samples, Mode::Clone).unwrap();

        let detail = read(dir.path(), DETAIL_FILE);
        assert_eq!(detail.lines().count(), 1); // header only
        let matrix = read(dir.path(), MATRIX_FILE);
        assert_eq!(matrix.lines().count(), 1);
    }

    #[test]
    fn rerun_is_byte_identical_and_reorder_permutes_columns() {
        let (dir, samples) = setup();
        combine_samples(dir.path(), &samples, Mode::Clone).unwrap();
        let first = read(dir.path(), MATRIX_FILE);
        combine_samples(dir.path(), &samples, Mode::Clone).unwrap();
        assert_eq!(first, read(dir.path(), MATRIX_FILE));

        let reversed: Vec<String> = samples.iter().rev().cloned().collect();
        combine_samples(dir.path(), &reversed, Mode::Clone).unwrap();
        let swapped = read(dir.path(), MATRIX_FILE);
        let lines: Vec<&str> = swapped.lines().collect();
        assert_eq!(lines[0], "locus,old_locus,gene,product,s2,s1");
        // same loci, same per-cell values, permuted columns
        assert_eq!(lines[1], "cds1,OLD_1,geneA,enzyme X,A->T,A->G");
        assert_eq!(lines[2], "cds2,OLD_2,geneB,kinase,-5 bp,-");
    }

    #[test]
    fn reserved_outputs_are_not_samples() {
        let (dir, _) = setup();
        fs::write(dir.path().join(MATRIX_FILE), "stale").unwrap();
        fs::write(dir.path().join(DETAIL_FILE), "stale").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut found = sample_files(dir.path()).unwrap();
        found.sort();
        assert_eq!(found, vec!["run_s1.csv".to_string(), "run_s2.csv".to_string()]);
    }

    #[test]
    fn clone_cells_truncate_mutation_at_label_suffix() {
        let dir = TempDir::new().unwrap();
        write_sample(
            dir.path(),
            "run_s1.csv",
            &[row("s1", "cds1", "OLD_1", "geneA", "enzyme X", "A->G (extra)", "NA")],
        );
        combine_samples(dir.path(), &["run_s1.csv".to_string()], Mode::Clone).unwrap();

        let matrix = read(dir.path(), MATRIX_FILE);
        assert!(matrix.lines().nth(1).unwrap().ends_with(",A->G"));
    }

    #[test]
    fn population_mode_fills_cells_with_frequency() {
        let dir = TempDir::new().unwrap();
        write_sample(
            dir.path(),
            "run_s1.csv",
            &[row("s1", "cds1", "OLD_1", "geneA", "enzyme X", "A->G", "85")],
        );
        combine_samples(
            dir.path(),
            &["run_s1.csv".to_string()],
            Mode::PolymorphismPrediction,
        )
        .unwrap();

        let matrix = read(dir.path(), MATRIX_FILE);
        assert_eq!(matrix.lines().nth(1).unwrap(), "cds1,OLD_1,geneA,enzyme X,85");
    }

    #[test]
    fn population_matrix_masks_numeric_gene() {
        let dir = TempDir::new().unwrap();
        write_sample(
            dir.path(),
            "run_s1.csv",
            &[row("s1", "cds1", "OLD_1", "42.5", "enzyme X", "A->G", "85")],
        );
        combine_samples(
            dir.path(),
            &["run_s1.csv".to_string()],
            Mode::PolymorphismPrediction,
        )
        .unwrap();

        let matrix = read(dir.path(), MATRIX_FILE);
        assert_eq!(matrix.lines().nth(1).unwrap(), "cds1,OLD_1,-,enzyme X,85");

        // clone mode leaves the same value untouched
        combine_samples(dir.path(), &["run_s1.csv".to_string()], Mode::Clone).unwrap();
        let matrix = read(dir.path(), MATRIX_FILE);
        assert_eq!(matrix.lines().nth(1).unwrap(), "cds1,OLD_1,42.5,enzyme X,A->G");
    }

    #[test]
    fn column_labels_take_last_underscore_token() {
        assert_eq!(column_label("run_batch2_s7.csv"), "s7");
        assert_eq!(column_label("plain.csv"), "plain");
        assert_eq!(column_label("trailing_.csv"), "trailing");
    }
}
