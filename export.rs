use crate::config::TAG_COLUMNS;
use crate::db;
use crate::error::{Error, Result};
use crate::models::{ExportMode, SheetRecord};
use crate::workbook::{write_workbook, Sheet, Workbook};
use rusqlite::Connection;
use std::collections::HashMap;

fn header_row() -> Vec<String> {
    let mut header = vec!["Human".to_string(), "AI".to_string()];
    header.extend(TAG_COLUMNS.iter().map(|t| t.to_string()));
    header.push("Notable images".to_string());
    header
}

fn column_widths() -> Vec<f64> {
    let mut widths = vec![15.0, 15.0];
    widths.extend(TAG_COLUMNS.iter().map(|t| if t.len() > 30 { 40.0 } else { 30.0 }));
    widths.push(30.0);
    widths
}

/// Duplicate-tab artifacts from repeated uploads: keep the first record per
/// sheet name, drop the rest.
fn dedup_by_sheet_name(records: Vec<SheetRecord>) -> Vec<SheetRecord> {
    let mut seen = Vec::new();
    let mut unique = Vec::new();
    for record in records {
        if seen.contains(&record.sheet_name) {
            continue;
        }
        seen.push(record.sheet_name.clone());
        unique.push(record);
    }
    unique
}

/// Images for one export line, bucketed per tag column.
fn tag_buckets() -> Vec<Vec<String>> {
    vec![Vec::new(); TAG_COLUMNS.len()]
}

fn fill_buckets(record: &SheetRecord, image_paths: &[String], buckets: &mut [Vec<String>]) {
    for image in image_paths {
        let Some(tags) = record.global_image_tags.get(image) else {
            continue;
        };
        for (i, column) in TAG_COLUMNS.iter().enumerate() {
            if tags.contains(*column) && !buckets[i].iter().any(|p| p == image) {
                buckets[i].push(image.clone());
            }
        }
    }
}

fn finish_line(human: &str, ai: &str, buckets: Vec<Vec<String>>) -> Vec<String> {
    let mut line = vec![human.to_string(), ai.to_string()];
    line.extend(buckets.into_iter().map(|images| images.join(", ")));
    // Notable images: placeholder column, always empty.
    line.push(String::new());
    line
}

/// Rows collapsed by (human, ai) label pair, first-seen order. Rows sharing
/// both labels merge into one line; their images deduplicate per tag column.
fn grouped_lines(record: &SheetRecord) -> Vec<Vec<String>> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut groups: HashMap<(String, String), Vec<Vec<String>>> = HashMap::new();

    for row in &record.rows {
        let key = (row.human.clone(), row.ai.clone());
        let buckets = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            tag_buckets()
        });
        fill_buckets(record, &row.image_paths, buckets);
    }

    order
        .into_iter()
        .map(|key| {
            let buckets = groups.remove(&key).unwrap_or_else(tag_buckets);
            finish_line(&key.0, &key.1, buckets)
        })
        .collect()
}

/// One output line per stored row, preserving row identity.
fn per_row_lines(record: &SheetRecord) -> Vec<Vec<String>> {
    record
        .rows
        .iter()
        .map(|row| {
            let mut buckets = tag_buckets();
            fill_buckets(record, &row.image_paths, &mut buckets);
            finish_line(&row.human, &row.ai, buckets)
        })
        .collect()
}

/// Builds the tagged analysis workbook for one uploaded file: one sheet per
/// unique sheet name, each row annotated with the globally tagged images.
pub fn export_tagged(conn: &Connection, filename: &str, mode: ExportMode) -> Result<Vec<u8>> {
    let records = db::find_all_by_filename(conn, filename)?;
    if records.is_empty() {
        return Err(Error::NotFound("No data found for this file".into()));
    }

    let mut workbook = Workbook::default();
    for record in dedup_by_sheet_name(records) {
        let mut rows = vec![header_row()];
        rows.extend(match mode {
            ExportMode::Grouped => grouped_lines(&record),
            ExportMode::Rows => per_row_lines(&record),
        });
        workbook.sheets.push(Sheet {
            name: record.sheet_name,
            rows,
            col_widths: column_widths(),
        });
    }

    write_workbook(&workbook)
}

/// Rebuilds a single stored sheet as originally uploaded. Returns the
/// workbook bytes and the uploaded filename for the download name.
pub fn export_original(conn: &Connection, id: i64) -> Result<(Vec<u8>, String)> {
    let record = db::get_sheet(conn, id)?
        .ok_or_else(|| Error::NotFound(format!("No sheet record #{id}")))?;

    let mut rows = vec![vec![
        "Human".to_string(),
        "AI".to_string(),
        "Filenames".to_string(),
    ]];
    rows.extend(record.rows.iter().map(|row| {
        vec![row.human.clone(), row.ai.clone(), row.filenames.clone()]
    }));

    let bytes = write_workbook(&Workbook {
        sheets: vec![Sheet {
            name: record.sheet_name,
            rows,
            col_widths: Vec::new(),
        }],
    })?;
    Ok((bytes, record.filename))
}

pub fn tagged_export_name(filename: &str) -> String {
    format!(
        "{}_tagged_analysis.xlsx",
        filename.trim_end_matches(".xlsx")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations;
    use crate::db::tests::test_conn;
    use crate::models::ComparisonRow;
    use crate::workbook::read_workbook;
    use std::collections::BTreeSet;

    const BLURRY_COLUMN: usize = 2;

    fn seed_record(conn: &Connection, sheet_name: &str) -> i64 {
        let record = SheetRecord {
            filename: "upload.xlsx".into(),
            sheet_name: sheet_name.into(),
            rows: vec![
                ComparisonRow::new("Coyote".into(), "Coyote".into(), "img001.jpg".into()),
                ComparisonRow::new(
                    "Coyote".into(),
                    "Coyote".into(),
                    "img001.jpg, img002.jpg".into(),
                ),
                ComparisonRow::new("Coyote".into(), "Bobcat".into(), "img003.jpg".into()),
            ],
            ..Default::default()
        };
        db::insert_sheet(conn, &record).unwrap()
    }

    fn tag_blurry(conn: &Connection, image: &str) {
        let tags: BTreeSet<String> = ["Blurry".to_string()].into();
        annotations::set_tags(conn, "upload.xlsx", image, &tags).unwrap();
    }

    #[test]
    fn grouping_merges_label_pairs_and_dedupes_images() {
        let conn = test_conn();
        seed_record(&conn, "Genus");
        tag_blurry(&conn, "img001.jpg");

        let bytes = export_tagged(&conn, "upload.xlsx", ExportMode::Grouped).unwrap();
        let parsed = read_workbook(&bytes).unwrap();

        let rows = &parsed.sheets[0].rows;
        // Header + two groups: (Coyote, Coyote) and (Coyote, Bobcat).
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0], "Coyote");
        assert_eq!(rows[1][1], "Coyote");
        // img001.jpg appears in both merged rows but only once in the column.
        assert_eq!(rows[1][BLURRY_COLUMN], "img001.jpg");
        assert_eq!(rows[2][1], "Bobcat");
        assert_eq!(rows[2][BLURRY_COLUMN], "");
        // Notable images column exists and is empty.
        assert_eq!(rows[0].last().unwrap(), "Notable images");
        assert_eq!(rows[1].last().unwrap(), "");
    }

    #[test]
    fn per_row_mode_preserves_row_identity() {
        let conn = test_conn();
        seed_record(&conn, "Genus");
        tag_blurry(&conn, "img001.jpg");

        let bytes = export_tagged(&conn, "upload.xlsx", ExportMode::Rows).unwrap();
        let parsed = read_workbook(&bytes).unwrap();

        let rows = &parsed.sheets[0].rows;
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1][BLURRY_COLUMN], "img001.jpg");
        assert_eq!(rows[2][BLURRY_COLUMN], "img001.jpg");
        assert_eq!(rows[3][BLURRY_COLUMN], "");
    }

    #[test]
    fn duplicate_sheet_names_export_once() {
        let conn = test_conn();
        seed_record(&conn, "Genus");
        seed_record(&conn, "Genus");
        seed_record(&conn, "Species");

        let bytes = export_tagged(&conn, "upload.xlsx", ExportMode::Grouped).unwrap();
        let parsed = read_workbook(&bytes).unwrap();

        let names: Vec<_> = parsed.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Genus", "Species"]);
    }

    #[test]
    fn export_requires_records() {
        let conn = test_conn();
        let err = export_tagged(&conn, "missing.xlsx", ExportMode::Grouped).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn original_export_rebuilds_raw_rows() {
        let conn = test_conn();
        let id = seed_record(&conn, "Genus");

        let (bytes, filename) = export_original(&conn, id).unwrap();
        assert_eq!(filename, "upload.xlsx");
        let parsed = read_workbook(&bytes).unwrap();

        let rows = &parsed.sheets[0].rows;
        assert_eq!(rows[0], vec!["Human", "AI", "Filenames"]);
        assert_eq!(rows[2][2], "img001.jpg, img002.jpg");
    }

    #[test]
    fn export_names_strip_the_extension() {
        assert_eq!(
            tagged_export_name("survey_b1.xlsx"),
            "survey_b1_tagged_analysis.xlsx"
        );
    }
}
