//! GenBank flat-file scan for locus tag aliases.
//!
//! Reference genomes that were re-annotated keep their superseded identifiers
//! as `old_locus_tag` qualifiers. The resolver maps every current locus tag to
//! its legacy tag, falling back to the tag itself when no legacy tag exists.

use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::gff::NO_VALUE;

/// Locus tag → legacy tag mapping with a `-` default for unknown tags.
#[derive(Debug, Default)]
pub struct LocusMap {
    map: HashMap<String, String>,
}

impl LocusMap {
    /// Scan a GenBank record line by line.
    ///
    /// A `/locus_tag` qualifier starts a new feature (mapped to itself until
    /// proven otherwise); a following `old_locus_tag` qualifier replaces the
    /// identity mapping with the legacy tag.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open GenBank file: {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut map = HashMap::new();
        let mut current: Option<String> = None;

        for line in reader.lines() {
            let line = line?;
            if line.contains("/locus_tag") {
                match qualifier_value(&line) {
                    Some(locus) => {
                        map.insert(locus.clone(), locus.clone());
                        current = Some(locus);
                    }
                    None => debug!("Skipping malformed locus_tag line: {line}"),
                }
            } else if line.contains("old_locus_tag") {
                if let (Some(locus), Some(old)) = (current.as_ref(), qualifier_value(&line)) {
                    map.insert(locus.clone(), old);
                }
            }
        }

        info!("Resolved {} locus tags from {}", map.len(), path.display());
        Ok(LocusMap { map })
    }

    /// Legacy tag for a locus; `-` when the locus was never seen.
    pub fn get(&self, locus: &str) -> &str {
        self.map.get(locus).map(String::as_str).unwrap_or(NO_VALUE)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Extract a qualifier value: strip spaces and quotes, split on `=`.
fn qualifier_value(line: &str) -> Option<String> {
    let cleaned: String = line
        .trim_end()
        .chars()
        .filter(|c| *c != ' ' && *c != '"')
        .collect();
    cleaned.split('=').nth(1).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_gbk(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn maps_locus_to_old_locus() {
        let gbk = "     gene            190..255\n\
                     /locus_tag=\"NEW_0001\"\n\
                     /old_locus_tag=\"OLD_0001\"\n";
        let file = write_gbk(gbk);
        let map = LocusMap::from_file(file.path()).unwrap();

        assert_eq!(map.get("NEW_0001"), "OLD_0001");
    }

    #[test]
    fn identity_fallback_without_old_tag() {
        let gbk = "                     /locus_tag=\"NEW_0002\"\n";
        let file = write_gbk(gbk);
        let map = LocusMap::from_file(file.path()).unwrap();

        assert_eq!(map.get("NEW_0002"), "NEW_0002");
    }

    #[test]
    fn unknown_locus_defaults_to_dash() {
        let map = LocusMap::default();
        assert_eq!(map.get("anything"), "-");
        assert_eq!(map.get("intergenic"), "-");
    }

    #[test]
    fn old_tag_applies_to_most_recent_locus_only() {
        let gbk = "                     /locus_tag=\"NEW_0001\"\n\
                     /old_locus_tag=\"OLD_0001\"\n\
                     /locus_tag=\"NEW_0002\"\n\
                     /locus_tag=\"NEW_0003\"\n\
                     /old_locus_tag=\"OLD_0003\"\n";
        let file = write_gbk(gbk);
        let map = LocusMap::from_file(file.path()).unwrap();

        assert_eq!(map.get("NEW_0001"), "OLD_0001");
        assert_eq!(map.get("NEW_0002"), "NEW_0002");
        assert_eq!(map.get("NEW_0003"), "OLD_0003");
    }

    #[test]
    fn malformed_qualifier_lines_are_skipped() {
        let gbk = "                     /locus_tag\n\
                     /locus_tag=\"NEW_0004\"\n";
        let file = write_gbk(gbk);
        let map = LocusMap::from_file(file.path()).unwrap();

        assert_eq!(map.get("NEW_0004"), "NEW_0004");
        assert!(!map.is_empty());
    }
}
