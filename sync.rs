use crate::annotations;
use crate::db;
use crate::error::{Error, Result};
use crate::mirror::{self, SpeciesMirror};
use rusqlite::Connection;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct ReclassifyOutcome {
    pub updated_image: String,
    pub species: String,
    pub mirror_updated: bool,
}

/// Applies a species reclassification: sheet record lookup, best-effort
/// mirror cell rewrite, then the authoritative fan-out write to the global
/// species map. The database write is the only gate on success; a mirror
/// miss or I/O failure is logged and swallowed.
pub fn apply_reclassification(
    conn: &Connection,
    mirror: &SpeciesMirror,
    filename: &str,
    sheet_name: &str,
    image_path: &str,
    species: &str,
) -> Result<ReclassifyOutcome> {
    db::find_by_filename_and_sheet(conn, filename, sheet_name)?.ok_or_else(|| {
        Error::NotFound(format!("No sheet record for '{filename}' / '{sheet_name}'"))
    })?;

    // The sheet name doubles as the rank hint for the mirror column.
    let mirror_updated = match mirror.update_species_cell(image_path, sheet_name, species) {
        Ok(update) => update.updated,
        Err(e) => {
            log::warn!("Mirror update failed for '{image_path}': {e}");
            false
        }
    };

    let (cleaned, _) = annotations::set_species(conn, filename, image_path, species)?;

    Ok(ReclassifyOutcome {
        updated_image: mirror::base_filename(image_path).to_string(),
        species: cleaned,
        mirror_updated,
    })
}

/// Flips one tag's membership in an image's global tag set and writes the
/// set back to every sheet record. Toggling the same tag twice restores the
/// original set.
pub fn apply_tag_toggle(
    conn: &Connection,
    filename: &str,
    image_id: &str,
    tag: &str,
) -> Result<BTreeSet<String>> {
    let map = annotations::get_tags(conn, filename)?;
    let mut tags = map.get(image_id).cloned().unwrap_or_default();
    if !tags.remove(tag) {
        tags.insert(tag.to_string());
    }
    annotations::set_tags(conn, filename, image_id, &tags)?;
    Ok(tags)
}
