use crate::annotations::{is_clear, normalize_species};
use crate::config::{AppPaths, TAXONOMIC_RANKS};
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};

lazy_static! {
    /// Lowercased rank names paired with their canonical column headers,
    /// resolved once instead of re-scanned per call.
    static ref RANK_TABLE: Vec<(String, &'static str)> = TAXONOMIC_RANKS
        .iter()
        .map(|rank| (rank.to_lowercase(), *rank))
        .collect();
}

/// Maps a sheet/tab label onto the taxonomic rank it names, by
/// case-insensitive substring containment ("Genus comparisons" -> Genus).
pub fn rank_for_hint(hint: &str) -> Option<&'static str> {
    let hint = hint.to_lowercase();
    RANK_TABLE
        .iter()
        .find(|(needle, _)| hint.contains(needle.as_str()))
        .map(|(_, rank)| *rank)
}

/// Last path segment of an image reference; mirror rows key on this.
pub fn base_filename(image_path: &str) -> &str {
    image_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(image_path)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorUpdate {
    pub updated: bool,
}

/// The on-disk CSV whose species columns are kept best-effort in sync with
/// reclassifications. Its canonical content is independent of the database;
/// nothing transactional links the two.
#[derive(Debug, Clone)]
pub struct SpeciesMirror {
    path: PathBuf,
    backups_dir: PathBuf,
}

impl SpeciesMirror {
    pub fn new(paths: &AppPaths) -> Self {
        Self {
            path: paths.mirror_path.clone(),
            backups_dir: paths.backups_dir.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the rank cell of the first data row matching the image's
    /// base filename. A missing file, an unresolvable rank or filename
    /// column, or no matching row are all non-fatal: the file stays
    /// untouched and `updated` is false.
    pub fn update_species_cell(
        &self,
        image_path: &str,
        rank_hint: &str,
        species: &str,
    ) -> Result<MirrorUpdate> {
        if !self.path.exists() {
            log::info!("Mirror CSV not found at {}, skipping", self.path.display());
            return Ok(MirrorUpdate::default());
        }

        let cleaned = if is_clear(species) {
            String::new()
        } else {
            normalize_species(species)
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        // Headers are matched trimmed but written back verbatim, so a
        // rewrite does not normalize whitespace the file already had.
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let rank_column = rank_for_hint(rank_hint).and_then(|rank| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(rank))
        });
        let filename_column = headers.iter().position(|h| {
            let h = h.trim().to_lowercase();
            h.contains("filename") || h.contains("file")
        });

        let (rank_column, filename_column) = match (rank_column, filename_column) {
            (Some(r), Some(f)) => (r, f),
            _ => {
                log::info!(
                    "Mirror columns not resolved for rank hint '{rank_hint}' \
                     (rank: {rank_column:?}, filename: {filename_column:?})"
                );
                return Ok(MirrorUpdate::default());
            }
        };

        let target = base_filename(image_path);
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut updated = false;
        for record in reader.records() {
            let mut row: Vec<String> =
                record?.iter().map(|cell| cell.to_string()).collect();
            if !updated {
                if let Some(cell) = row.get(filename_column) {
                    let cell = cell.trim().trim_matches(|c| c == '"' || c == '\'');
                    if cell == target || cell.contains(target) {
                        while row.len() <= rank_column {
                            row.push(String::new());
                        }
                        row[rank_column] = cleaned.clone();
                        // First match only; later duplicates stay untouched.
                        updated = true;
                    }
                }
            }
            rows.push(row);
        }

        if !updated {
            log::info!("No mirror row matched image '{target}'");
            return Ok(MirrorUpdate::default());
        }

        self.backup_existing();
        self.write_rows(&headers, &rows)?;
        log::info!("Mirror updated: {target} -> '{cleaned}' ({rank_hint})");
        Ok(MirrorUpdate { updated: true })
    }

    /// Replaces the mirror wholesale from an uploaded CSV. Returns the
    /// parsed header list and data row count for the response payload.
    pub fn install(&self, content: &[u8]) -> Result<(Vec<String>, usize)> {
        self.backup_existing();
        std::fs::write(&self.path, content)?;

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(content);
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let row_count = reader.records().filter_map(|r| r.ok()).count();
        Ok((headers, row_count))
    }

    /// Full-text read for download.
    pub fn read_all(&self) -> Result<String> {
        if !self.path.exists() {
            return Err(Error::NotFound(
                "CSV file not found. Please upload a CSV file first.".into(),
            ));
        }
        Ok(std::fs::read_to_string(&self.path)?)
    }

    // Best-effort timestamped copy; failure never blocks the write.
    fn backup_existing(&self) {
        if !self.path.exists() {
            return;
        }
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("mirror");
        let backup = self.backups_dir.join(format!(
            "{stem}_backup_{}.csv",
            chrono::Utc::now().timestamp_millis()
        ));
        if let Err(e) = std::fs::copy(&self.path, &backup) {
            log::warn!("Mirror backup to {} failed: {e}", backup.display());
        }
    }

    fn write_rows(&self, headers: &[String], rows: &[Vec<String>]) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        writer.write_record(headers)?;
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror_in(dir: &Path) -> SpeciesMirror {
        let backups = dir.join("backups");
        std::fs::create_dir_all(&backups).unwrap();
        SpeciesMirror {
            path: dir.join("mirror.csv"),
            backups_dir: backups,
        }
    }

    fn seed(mirror: &SpeciesMirror, content: &str) {
        std::fs::write(mirror.path(), content).unwrap();
    }

    #[test]
    fn updates_the_matching_rank_cell() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = mirror_in(dir.path());
        seed(&mirror, "Filename,Class,Order\nimg001.jpg,Mammalia,Carnivora\n");

        let result = mirror
            .update_species_cell("trail/img001.jpg", "Order", "Canidae")
            .unwrap();
        assert!(result.updated);

        let content = std::fs::read_to_string(mirror.path()).unwrap();
        assert!(content.contains("img001.jpg,Mammalia,Canidae"));
    }

    #[test]
    fn unmatched_filename_leaves_file_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = mirror_in(dir.path());
        let original = "Filename,Class,Order\nimg001.jpg,Mammalia,Carnivora\n";
        seed(&mirror, original);

        let result = mirror
            .update_species_cell("img999.jpg", "Order", "Canidae")
            .unwrap();
        assert!(!result.updated);
        assert_eq!(std::fs::read_to_string(mirror.path()).unwrap(), original);
    }

    #[test]
    fn missing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = mirror_in(dir.path());
        let result = mirror
            .update_species_cell("img001.jpg", "Order", "Canidae")
            .unwrap();
        assert!(!result.updated);
    }

    #[test]
    fn clearing_writes_an_empty_cell() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = mirror_in(dir.path());
        seed(&mirror, "Filename,Class,Order\nimg001.jpg,Mammalia,Carnivora\n");

        let result = mirror
            .update_species_cell("img001.jpg", "Order", "")
            .unwrap();
        assert!(result.updated);
        let content = std::fs::read_to_string(mirror.path()).unwrap();
        assert!(content.contains("img001.jpg,Mammalia,\n"));
    }

    #[test]
    fn only_the_first_matching_row_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = mirror_in(dir.path());
        seed(
            &mirror,
            "Filename,Order\nimg001.jpg,Carnivora\nimg001.jpg,Carnivora\n",
        );

        mirror
            .update_species_cell("img001.jpg", "Order", "Rodentia")
            .unwrap();
        let content = std::fs::read_to_string(mirror.path()).unwrap();
        assert!(content.contains("img001.jpg,Rodentia\nimg001.jpg,Carnivora"));
    }

    #[test]
    fn rewrite_keeps_header_whitespace_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = mirror_in(dir.path());
        seed(&mirror, "Filename , Order\nimg001.jpg,Carnivora\n");

        let result = mirror
            .update_species_cell("img001.jpg", "Order", "Rodentia")
            .unwrap();
        assert!(result.updated);

        let content = std::fs::read_to_string(mirror.path()).unwrap();
        assert!(content.starts_with("Filename , Order\n"));
        assert!(content.contains("img001.jpg,Rodentia"));
    }

    #[test]
    fn successful_update_leaves_a_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = mirror_in(dir.path());
        seed(&mirror, "Filename,Genus\nimg001.jpg,Canis\n");

        mirror
            .update_species_cell("img001.jpg", "Genus", "Lynx")
            .unwrap();
        let backups: Vec<_> = std::fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn unknown_rank_hint_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = mirror_in(dir.path());
        seed(&mirror, "Filename,Order\nimg001.jpg,Carnivora\n");

        let result = mirror
            .update_species_cell("img001.jpg", "Summary", "Canidae")
            .unwrap();
        assert!(!result.updated);
    }

    #[test]
    fn rank_hints_match_by_substring() {
        assert_eq!(rank_for_hint("Genus"), Some("Genus"));
        assert_eq!(rank_for_hint("genus comparisons"), Some("Genus"));
        assert_eq!(rank_for_hint("Common_name"), Some("Common_name"));
        assert_eq!(rank_for_hint("Summary"), None);
    }

    #[test]
    fn install_reports_headers_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = mirror_in(dir.path());
        seed(&mirror, "old\n");

        let (headers, rows) = mirror
            .install(b"Filename,Class\nimg001.jpg,Mammalia\nimg002.jpg,Aves\n")
            .unwrap();
        assert_eq!(headers, vec!["Filename", "Class"]);
        assert_eq!(rows, 2);
        // The prior file was backed up before being replaced.
        assert_eq!(
            std::fs::read_dir(dir.path().join("backups")).unwrap().count(),
            1
        );
    }
}
