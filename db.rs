use crate::config::AppPaths;
use crate::error::Result;
use crate::models::{ComparisonRow, SheetRecord, SheetSummary, SpeciesMap, TagMap};
use crate::schema;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Initializes the database connection pool and runs migrations.
pub fn init_database(paths: &AppPaths) -> Result<DbPool> {
    log::info!("Database path: {}", paths.db_path.display());

    // Ensure the parent directory exists
    if let Some(parent) = paths.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(&paths.db_path);
    let pool = r2d2::Pool::new(manager)?;

    let conn = pool.get()?;
    run_migrations(&conn)?;

    Ok(pool)
}

/// Applies all pending database migrations.
pub fn run_migrations(connection: &Connection) -> Result<()> {
    log::info!("Running database migrations...");

    // Migration 0001: Initial Schema
    connection.execute_batch(schema::MIGRATION_0001)?;

    log::info!("Migrations applied successfully.");
    Ok(())
}

/// Inserts a freshly parsed sheet record, returning its id.
pub fn insert_sheet(conn: &Connection, record: &SheetRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO sheets (filename, sheet_name, rows, global_image_tags, global_image_species)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.filename,
            record.sheet_name,
            serde_json::to_string(&record.rows)?,
            serde_json::to_string(&record.global_image_tags)?,
            serde_json::to_string(&record.global_image_species)?,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

const RECORD_COLUMNS: &str =
    "id, filename, sheet_name, rows, global_image_tags, global_image_species, uploaded_at";

fn parse_record(
    row: (i64, String, String, String, String, String, i64),
) -> Result<SheetRecord> {
    let (id, filename, sheet_name, rows, tags, species, uploaded_at) = row;
    Ok(SheetRecord {
        id: Some(id),
        filename,
        sheet_name,
        rows: serde_json::from_str(&rows)?,
        global_image_tags: serde_json::from_str(&tags)?,
        global_image_species: serde_json::from_str(&species)?,
        uploaded_at: Some(uploaded_at),
    })
}

fn query_records(
    conn: &Connection,
    where_clause: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<SheetRecord>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM sheets {where_clause}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, |row| {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    })?;
    let mut records = Vec::new();
    for row in rows {
        records.push(parse_record(row?)?);
    }
    Ok(records)
}

pub fn get_sheet(conn: &Connection, id: i64) -> Result<Option<SheetRecord>> {
    Ok(query_records(conn, "WHERE id = ?1", &[&id])?.into_iter().next())
}

pub fn find_by_filename_and_sheet(
    conn: &Connection,
    filename: &str,
    sheet_name: &str,
) -> Result<Option<SheetRecord>> {
    Ok(query_records(
        conn,
        "WHERE filename = ?1 AND sheet_name = ?2 ORDER BY id LIMIT 1",
        &[&filename, &sheet_name],
    )?
    .into_iter()
    .next())
}

/// All records sharing an uploaded filename, ordered by sheet name then id,
/// so a keep-first dedup retains the earliest upload of each tab.
pub fn find_all_by_filename(conn: &Connection, filename: &str) -> Result<Vec<SheetRecord>> {
    query_records(
        conn,
        "WHERE filename = ?1 ORDER BY sheet_name, id",
        &[&filename],
    )
}

/// Sheet listing for one uploaded file, deduplicated by sheet name.
pub fn list_sheets(conn: &Connection, filename: &str) -> Result<Vec<SheetSummary>> {
    let mut stmt = conn.prepare(
        "SELECT MIN(id) AS id, sheet_name FROM sheets
         WHERE filename = ?1 GROUP BY sheet_name ORDER BY id",
    )?;
    let rows = stmt.query_map(params![filename], |row| {
        Ok(SheetSummary {
            id: row.get(0)?,
            sheet_name: row.get(1)?,
        })
    })?;
    let mut sheets = Vec::new();
    for row in rows {
        sheets.push(row?);
    }
    Ok(sheets)
}

/// Replaces a record's row array. Returns false when the id is unknown.
pub fn update_rows(conn: &Connection, id: i64, rows: &[ComparisonRow]) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE sheets SET rows = ?2 WHERE id = ?1",
        params![id, serde_json::to_string(rows)?],
    )?;
    Ok(changed > 0)
}

// The annotation maps are written column-at-a-time: a caller that edited
// only the tag map must not clobber rows or the species map. This is the
// partial-field-update contract the fan-out writes in `annotations` rely on.

pub fn update_global_tags(conn: &Connection, id: i64, tags: &TagMap) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE sheets SET global_image_tags = ?2 WHERE id = ?1",
        params![id, serde_json::to_string(tags)?],
    )?;
    Ok(changed > 0)
}

pub fn update_global_species(conn: &Connection, id: i64, species: &SpeciesMap) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE sheets SET global_image_species = ?2 WHERE id = ?1",
        params![id, serde_json::to_string(species)?],
    )?;
    Ok(changed > 0)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::models::ComparisonRow;

    pub fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    pub fn sample_record(filename: &str, sheet_name: &str) -> SheetRecord {
        SheetRecord {
            filename: filename.into(),
            sheet_name: sheet_name.into(),
            rows: vec![
                ComparisonRow::new("Coyote".into(), "Coyote".into(), "img001.jpg, img002.jpg".into()),
                ComparisonRow::new("Coyote".into(), "Bobcat".into(), "img003.jpg".into()),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn init_database_yields_a_working_pool() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths {
            root: dir.path().to_path_buf(),
            db_path: dir.path().join("review.db"),
            images_root: dir.path().join("images"),
            mirror_path: dir.path().join("mirror.csv"),
            backups_dir: dir.path().join("backups"),
        };

        let pool = init_database(&paths).unwrap();
        let conn = pool.get().unwrap();
        let id = insert_sheet(&conn, &sample_record("upload.xlsx", "Genus")).unwrap();
        assert!(get_sheet(&conn, id).unwrap().is_some());
    }

    #[test]
    fn insert_and_fetch_roundtrip() {
        let conn = test_conn();
        let id = insert_sheet(&conn, &sample_record("upload.xlsx", "Genus")).unwrap();

        let fetched = get_sheet(&conn, id).unwrap().unwrap();
        assert_eq!(fetched.filename, "upload.xlsx");
        assert_eq!(fetched.sheet_name, "Genus");
        assert_eq!(fetched.rows.len(), 2);
        assert_eq!(fetched.rows[0].image_paths, vec!["img001.jpg", "img002.jpg"]);
        assert!(fetched.uploaded_at.is_some());
    }

    #[test]
    fn partial_update_leaves_other_fields_alone() {
        let conn = test_conn();
        let id = insert_sheet(&conn, &sample_record("upload.xlsx", "Genus")).unwrap();

        let mut tags = TagMap::new();
        tags.insert("img001.jpg".into(), ["Blurry".to_string()].into());
        assert!(update_global_tags(&conn, id, &tags).unwrap());

        let fetched = get_sheet(&conn, id).unwrap().unwrap();
        assert_eq!(fetched.rows.len(), 2);
        assert!(fetched.global_image_species.is_empty());
        assert!(fetched.global_image_tags["img001.jpg"].contains("Blurry"));
    }

    #[test]
    fn list_sheets_dedupes_by_name() {
        let conn = test_conn();
        insert_sheet(&conn, &sample_record("upload.xlsx", "Genus")).unwrap();
        insert_sheet(&conn, &sample_record("upload.xlsx", "Genus")).unwrap();
        insert_sheet(&conn, &sample_record("upload.xlsx", "Species")).unwrap();
        insert_sheet(&conn, &sample_record("other.xlsx", "Genus")).unwrap();

        let sheets = list_sheets(&conn, "upload.xlsx").unwrap();
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].sheet_name, "Genus");
        assert_eq!(sheets[1].sheet_name, "Species");
    }

    #[test]
    fn update_rows_reports_unknown_id() {
        let conn = test_conn();
        assert!(!update_rows(&conn, 42, &[]).unwrap());
    }
}
