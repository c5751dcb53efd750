/// MIGRATION 0001: Initial database schema.
pub const MIGRATION_0001: &str = r#"
-- Sheets Table: One document per (uploaded file, sheet tab) pair.
-- The row array and the two global annotation maps are stored as JSON
-- documents; updates touch individual columns only.
CREATE TABLE IF NOT EXISTS sheets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    sheet_name TEXT NOT NULL,
    rows TEXT NOT NULL DEFAULT '[]',
    global_image_tags TEXT NOT NULL DEFAULT '{}',
    global_image_species TEXT NOT NULL DEFAULT '{}',
    uploaded_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- Indexes for faster queries
CREATE INDEX IF NOT EXISTS idx_sheets_filename ON sheets (filename);
CREATE INDEX IF NOT EXISTS idx_sheets_filename_sheet ON sheets (filename, sheet_name);
"#;
