use crate::db;
use crate::error::{Error, Result};
use crate::models::{ComparisonRow, SheetRecord, SheetSummary};
use crate::workbook;
use rusqlite::Connection;

fn find_column(headers: &[String], needle: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.to_lowercase().contains(needle))
}

fn cell(row: &[String], idx: usize) -> String {
    row.get(idx).cloned().unwrap_or_default()
}

/// Parses an uploaded workbook into one sheet record per qualifying tab.
///
/// A tab qualifies when its header row contains Human, AI and Filenames
/// columns (matched case-insensitively by substring); others are skipped.
pub fn ingest_workbook(
    conn: &Connection,
    filename: &str,
    bytes: &[u8],
) -> Result<Vec<SheetSummary>> {
    let parsed = workbook::read_workbook(bytes)?;

    let mut created = Vec::new();
    for sheet in parsed.sheets {
        let Some(headers) = sheet.rows.first() else {
            continue;
        };
        let human = find_column(headers, "human");
        let ai = find_column(headers, "ai");
        let filenames = find_column(headers, "filenames");
        let (Some(human), Some(ai), Some(filenames)) = (human, ai, filenames) else {
            log::info!(
                "Skipping sheet '{}': missing Human/AI/Filenames columns",
                sheet.name
            );
            continue;
        };

        let rows: Vec<ComparisonRow> = sheet.rows[1..]
            .iter()
            .map(|row| {
                ComparisonRow::new(cell(row, human), cell(row, ai), cell(row, filenames))
            })
            .collect();

        let record = SheetRecord {
            filename: filename.to_string(),
            sheet_name: sheet.name.clone(),
            rows,
            ..Default::default()
        };
        let id = db::insert_sheet(conn, &record)?;
        log::info!("Stored sheet '{}' ({} rows) as #{id}", sheet.name, record.rows.len());
        created.push(SheetSummary {
            id,
            sheet_name: sheet.name,
        });
    }

    if created.is_empty() {
        return Err(Error::Validation(
            "No valid sheets found with Human/AI/Filenames columns".into(),
        ));
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_conn;
    use crate::workbook::{write_workbook, Sheet, Workbook};

    fn upload_bytes() -> Vec<u8> {
        let mut genus = Sheet::new("Genus");
        genus.rows = vec![
            vec!["Human ID".into(), "AI Guess".into(), "Filenames".into()],
            vec!["Coyote".into(), "Coyote".into(), "img001.jpg, img002.jpg".into()],
            vec!["Coyote".into(), "Bobcat".into(), "img003.jpg".into()],
        ];
        let mut notes = Sheet::new("Notes");
        notes.rows = vec![vec!["Summary".into()], vec!["free text".into()]];
        write_workbook(&Workbook {
            sheets: vec![genus, notes],
        })
        .unwrap()
    }

    #[test]
    fn ingests_qualifying_sheets_only() {
        let conn = test_conn();
        let created = ingest_workbook(&conn, "upload.xlsx", &upload_bytes()).unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].sheet_name, "Genus");

        let record = db::get_sheet(&conn, created[0].id).unwrap().unwrap();
        assert_eq!(record.rows.len(), 2);
        assert_eq!(record.rows[0].human, "Coyote");
        assert_eq!(record.rows[0].image_paths, vec!["img001.jpg", "img002.jpg"]);
        assert_eq!(record.rows[1].ai, "Bobcat");
    }

    #[test]
    fn rejects_workbooks_with_no_qualifying_sheet() {
        let conn = test_conn();
        let mut sheet = Sheet::new("Notes");
        sheet.rows = vec![vec!["Summary".into()]];
        let bytes = write_workbook(&Workbook { sheets: vec![sheet] }).unwrap();

        let err = ingest_workbook(&conn, "upload.xlsx", &bytes).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
