use crate::config::CLEAR_SELECTION;
use crate::db;
use crate::error::{Error, Result};
use crate::models::{SpeciesMap, TagMap};
use rusqlite::Connection;
use std::collections::BTreeSet;

/// Rewrites mis-encoded em dashes to a plain hyphen. Species labels arrive
/// both as a literal em dash and as its Latin-1 mojibake form, depending on
/// which tool produced the upload.
pub fn normalize_species(raw: &str) -> String {
    raw.replace("\u{201A}\u{00C4}\u{00EE}", "-").replace('\u{2014}', "-")
}

/// True when a species value asks for the classification to be removed.
pub fn is_clear(species: &str) -> bool {
    species.is_empty() || species == CLEAR_SELECTION
}

/// Overwrites the full tag set for one image on every sheet record sharing
/// `filename`. Sequential, no rollback: on a mid-loop failure the records
/// already written stay written and the error lists the sheets that failed.
pub fn set_tags(
    conn: &Connection,
    filename: &str,
    image_id: &str,
    tags: &BTreeSet<String>,
) -> Result<usize> {
    let records = db::find_all_by_filename(conn, filename)?;
    if records.is_empty() {
        return Err(Error::NotFound(format!(
            "No sheet records for '{filename}'"
        )));
    }

    let total = records.len();
    let mut failed = Vec::new();
    for record in records {
        let id = record.id.unwrap_or_default();
        let mut map = record.global_image_tags;
        map.insert(image_id.to_string(), tags.clone());
        match db::update_global_tags(conn, id, &map) {
            Ok(true) => {}
            Ok(false) => failed.push(record.sheet_name),
            Err(e) => {
                log::warn!(
                    "Failed to write global tags for sheet '{}': {e}",
                    record.sheet_name
                );
                failed.push(record.sheet_name);
            }
        }
    }

    if failed.is_empty() {
        Ok(total)
    } else {
        Err(Error::PartialSync {
            filename: filename.to_string(),
            applied: total - failed.len(),
            total,
            failed,
        })
    }
}

/// Sets (or clears) the species label for one image on every sheet record
/// sharing `filename`. Returns the normalized value actually stored (empty
/// when cleared) and the number of records written. Same fan-out semantics
/// as [`set_tags`].
pub fn set_species(
    conn: &Connection,
    filename: &str,
    image_id: &str,
    species: &str,
) -> Result<(String, usize)> {
    let records = db::find_all_by_filename(conn, filename)?;
    if records.is_empty() {
        return Err(Error::NotFound(format!(
            "No sheet records for '{filename}'"
        )));
    }

    let clearing = is_clear(species);
    let cleaned = if clearing {
        String::new()
    } else {
        normalize_species(species)
    };

    let total = records.len();
    let mut failed = Vec::new();
    for record in records {
        let id = record.id.unwrap_or_default();
        let mut map = record.global_image_species;
        if clearing {
            map.remove(image_id);
        } else {
            map.insert(image_id.to_string(), cleaned.clone());
        }
        match db::update_global_species(conn, id, &map) {
            Ok(true) => {}
            Ok(false) => failed.push(record.sheet_name),
            Err(e) => {
                log::warn!(
                    "Failed to write global species for sheet '{}': {e}",
                    record.sheet_name
                );
                failed.push(record.sheet_name);
            }
        }
    }

    if failed.is_empty() {
        Ok((cleaned, total))
    } else {
        Err(Error::PartialSync {
            filename: filename.to_string(),
            applied: total - failed.len(),
            total,
            failed,
        })
    }
}

/// Reads the tag map from any one record for `filename`; the fan-out
/// invariant makes them all identical.
pub fn get_tags(conn: &Connection, filename: &str) -> Result<TagMap> {
    let record = db::find_all_by_filename(conn, filename)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("No sheet records for '{filename}'")))?;
    Ok(record.global_image_tags)
}

/// Reads the species map, re-normalizing values in case older records were
/// stored before the dash cleanup existed.
pub fn get_species(conn: &Connection, filename: &str) -> Result<SpeciesMap> {
    let record = db::find_all_by_filename(conn, filename)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("No sheet records for '{filename}'")))?;
    Ok(record
        .global_image_species
        .into_iter()
        .map(|(image, species)| (image, normalize_species(&species)))
        .collect())
}
