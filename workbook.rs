//! Minimal XLSX codec: string-valued cells only, which is all the review
//! workflow stores. Reading resolves shared, inline and literal cell values;
//! writing emits inline strings so no shared-string table is needed.

use crate::error::{Error, Result};
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;

#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
    /// Optional column widths, applied positionally. Presentation only.
    pub col_widths: Vec<f64>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

/// Column index (0-based) from an A1-style cell reference.
fn col_index(cell_ref: &str) -> usize {
    let mut idx = 0usize;
    for c in cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()) {
        idx = idx * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    idx.saturating_sub(1)
}

/// A1-style column letters for a 0-based index.
fn col_letters(mut idx: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (idx % 26) as u8);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn write_workbook(workbook: &Workbook) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options =
            FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file("[Content_Types].xml", options)?;
        zip.write_all(content_types_xml(workbook.sheets.len()).as_bytes())?;

        zip.start_file("_rels/.rels", options)?;
        zip.write_all(rels_xml().as_bytes())?;

        zip.start_file("xl/workbook.xml", options)?;
        zip.write_all(workbook_xml(workbook).as_bytes())?;

        zip.start_file("xl/_rels/workbook.xml.rels", options)?;
        zip.write_all(workbook_rels_xml(workbook.sheets.len()).as_bytes())?;

        zip.start_file("xl/styles.xml", options)?;
        zip.write_all(styles_xml().as_bytes())?;

        for (i, sheet) in workbook.sheets.iter().enumerate() {
            zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)?;
            zip.write_all(worksheet_xml(sheet).as_bytes())?;
        }

        zip.finish()?;
    }
    Ok(buffer.into_inner())
}

fn content_types_xml(sheet_count: usize) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="xml" ContentType="application/xml"/>
  <Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
  <Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>
"#,
    );
    for i in 0..sheet_count {
        out.push_str(&format!(
            "  <Override PartName=\"/xl/worksheets/sheet{}.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>\n",
            i + 1
        ));
    }
    out.push_str("</Types>\n");
    out
}

fn rels_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>
"#
    .to_owned()
}

fn workbook_xml(workbook: &Workbook) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"
          xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
"#,
    );
    for (i, sheet) in workbook.sheets.iter().enumerate() {
        out.push_str(&format!(
            "    <sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>\n",
            xml_escape(&sheet.name),
            i + 1,
            i + 1
        ));
    }
    out.push_str("  </sheets>\n</workbook>\n");
    out
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
"#,
    );
    for i in 0..sheet_count {
        out.push_str(&format!(
            "  <Relationship Id=\"rId{}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"worksheets/sheet{}.xml\"/>\n",
            i + 1,
            i + 1
        ));
    }
    out.push_str(&format!(
        "  <Relationship Id=\"rId{}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles\" Target=\"styles.xml\"/>\n",
        sheet_count + 1
    ));
    out.push_str("</Relationships>\n");
    out
}

fn styles_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts>
  <fills count="1"><fill><patternFill patternType="none"/></fill></fills>
  <borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>
  <cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>
  <cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs>
  <cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>
</styleSheet>
"#
    .to_owned()
}

fn worksheet_xml(sheet: &Sheet) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
"#,
    );
    if !sheet.col_widths.is_empty() {
        out.push_str("  <cols>\n");
        for (i, width) in sheet.col_widths.iter().enumerate() {
            out.push_str(&format!(
                "    <col min=\"{0}\" max=\"{0}\" width=\"{1}\" customWidth=\"1\"/>\n",
                i + 1,
                width
            ));
        }
        out.push_str("  </cols>\n");
    }
    out.push_str("  <sheetData>\n");
    for (r, row) in sheet.rows.iter().enumerate() {
        out.push_str(&format!("    <row r=\"{}\">", r + 1));
        // Empty cells are written too, so row shape survives a round-trip.
        for (c, cell) in row.iter().enumerate() {
            out.push_str(&format!(
                "<c r=\"{}{}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                col_letters(c),
                r + 1,
                xml_escape(cell)
            ));
        }
        out.push_str("</row>\n");
    }
    out.push_str("  </sheetData>\n</worksheet>\n");
    out
}

pub fn read_workbook(bytes: &[u8]) -> Result<Workbook> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let workbook_xml = read_entry(&mut archive, "xl/workbook.xml")?
        .ok_or_else(|| Error::Workbook("missing xl/workbook.xml".into()))?;
    let rels_xml = read_entry(&mut archive, "xl/_rels/workbook.xml.rels")?
        .ok_or_else(|| Error::Workbook("missing workbook relationships".into()))?;
    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let rels = parse_relationships(&rels_xml)?;

    let doc = roxmltree::Document::parse(&workbook_xml)?;
    let mut workbook = Workbook::default();
    for node in doc.descendants().filter(|n| n.has_tag_name("sheet")) {
        let name = node.attribute("name").unwrap_or_default().to_string();
        let rel_id = node
            .attributes()
            .find(|a| a.name() == "id")
            .map(|a| a.value().to_string())
            .ok_or_else(|| Error::Workbook(format!("sheet '{name}' has no relationship id")))?;
        let target = rels
            .iter()
            .find(|(id, _)| *id == rel_id)
            .map(|(_, target)| target.clone())
            .ok_or_else(|| Error::Workbook(format!("unresolved relationship '{rel_id}'")))?;

        let path = resolve_target(&target);
        let sheet_xml = read_entry(&mut archive, &path)?
            .ok_or_else(|| Error::Workbook(format!("missing worksheet part '{path}'")))?;
        let rows = parse_sheet_rows(&sheet_xml, &shared)?;
        workbook.sheets.push(Sheet {
            name,
            rows,
            col_widths: Vec::new(),
        });
    }

    Ok(workbook)
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<String>> {
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            Ok(Some(content))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_relationships(xml: &str) -> Result<Vec<(String, String)>> {
    let doc = roxmltree::Document::parse(xml)?;
    Ok(doc
        .descendants()
        .filter(|n| n.has_tag_name("Relationship"))
        .filter_map(|n| {
            Some((
                n.attribute("Id")?.to_string(),
                n.attribute("Target")?.to_string(),
            ))
        })
        .collect())
}

fn resolve_target(target: &str) -> String {
    let target = target.trim_start_matches('/');
    if target.starts_with("xl/") {
        target.to_string()
    } else {
        format!("xl/{target}")
    }
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
    let doc = roxmltree::Document::parse(xml)?;
    Ok(doc
        .descendants()
        .filter(|n| n.has_tag_name("si"))
        .map(|si| {
            si.descendants()
                .filter(|n| n.has_tag_name("t"))
                .filter_map(|t| t.text())
                .collect::<String>()
        })
        .collect())
}

/// Row limit of the xlsx format itself (2^20).
const MAX_ROW: usize = 1_048_576;

fn parse_sheet_rows(xml: &str, shared: &[String]) -> Result<Vec<Vec<String>>> {
    let doc = roxmltree::Document::parse(xml)?;
    let mut rows: Vec<Vec<String>> = Vec::new();

    for row_node in doc.descendants().filter(|n| n.has_tag_name("row")) {
        // Honor the declared row number so blank rows keep positions stable.
        // Row numbers are 1-based and capped at the format's sheet limit;
        // anything else is a corrupt part, not a gap to fill.
        let row_num = match row_node.attribute("r") {
            None => rows.len() + 1,
            Some(r) => match r.parse::<usize>() {
                Ok(n) if (1..=MAX_ROW).contains(&n) => n,
                _ => {
                    return Err(Error::Workbook(format!(
                        "invalid worksheet row number '{r}'"
                    )))
                }
            },
        };
        while rows.len() < row_num {
            rows.push(Vec::new());
        }
        let row = &mut rows[row_num - 1];

        for cell in row_node.children().filter(|n| n.has_tag_name("c")) {
            let col = cell.attribute("r").map(col_index).unwrap_or(row.len());
            let value = cell_value(&cell, shared);
            while row.len() <= col {
                row.push(String::new());
            }
            row[col] = value;
        }
    }

    Ok(rows)
}

fn cell_value(cell: &roxmltree::Node, shared: &[String]) -> String {
    let cell_type = cell.attribute("t").unwrap_or("n");
    match cell_type {
        "inlineStr" => cell
            .descendants()
            .filter(|n| n.has_tag_name("t"))
            .filter_map(|t| t.text())
            .collect(),
        "s" => cell
            .children()
            .find(|n| n.has_tag_name("v"))
            .and_then(|v| v.text())
            .and_then(|idx| idx.trim().parse::<usize>().ok())
            .and_then(|idx| shared.get(idx).cloned())
            .unwrap_or_default(),
        _ => cell
            .children()
            .find(|n| n.has_tag_name("v"))
            .and_then(|v| v.text())
            .unwrap_or_default()
            .to_string(),
    }
}
