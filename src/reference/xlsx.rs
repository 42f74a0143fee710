// src/reference/xlsx.rs

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::{debug, trace};
use zip::ZipArchive;

static CELL_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$?([A-Za-z]+)\$?(\d+)$").expect("cell reference regex"));

/// A worksheet read as text: the first row is the header, the rest is data.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    /// Index of the column whose header equals `name` (surrounding whitespace ignored).
    pub fn column(&self, name: &str) -> Result<usize> {
        self.header
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| anyhow!("sheet `{}` has no column `{}`", self.name, name))
    }

    /// Cell text at (`row`, `col`), empty when the row is short.
    pub fn cell<'a>(&'a self, row: &'a [String], col: usize) -> &'a str {
        row.get(col).map(|s| s.trim()).unwrap_or("")
    }
}

/// Minimal SpreadsheetML reader over an in-memory `.xlsx`.
pub struct Workbook {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    sheet_paths: Vec<(String, String)>,
    shared_strings: Vec<String>,
}

impl Workbook {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).context("opening xlsx archive")?;

        let workbook_xml = read_entry(&mut archive, "xl/workbook.xml")?
            .ok_or_else(|| anyhow!("xlsx has no xl/workbook.xml"))?;
        let rels_xml = read_entry(&mut archive, "xl/_rels/workbook.xml.rels")?
            .ok_or_else(|| anyhow!("xlsx has no xl/_rels/workbook.xml.rels"))?;

        let targets = parse_relationships(&rels_xml)?;
        let mut sheet_paths = Vec::new();
        for (name, rel_id) in parse_sheet_list(&workbook_xml)? {
            let target = targets
                .get(&rel_id)
                .ok_or_else(|| anyhow!("sheet `{}` points at missing relationship {}", name, rel_id))?;
            sheet_paths.push((name, resolve_target(target)));
        }

        let shared_strings = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
            Some(xml) => parse_shared_strings(&xml)?,
            None => Vec::new(),
        };
        debug!(
            sheets = sheet_paths.len(),
            shared = shared_strings.len(),
            "opened workbook"
        );

        Ok(Self {
            archive,
            sheet_paths,
            shared_strings,
        })
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheet_paths.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Read the sheet called `name`.
    pub fn sheet(&mut self, name: &str) -> Result<Sheet> {
        let path = self
            .sheet_paths
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| anyhow!("workbook has no sheet named `{}`", name))?;
        let xml = read_entry(&mut self.archive, &path)?
            .ok_or_else(|| anyhow!("sheet `{}` missing at {}", name, path))?;

        let mut grid = parse_sheet_cells(&xml, &self.shared_strings)
            .with_context(|| format!("parsing sheet `{}`", name))?;
        if grid.is_empty() {
            bail!("sheet `{}` is empty", name);
        }
        let header = grid.remove(0);
        let rows = grid
            .into_iter()
            .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
            .collect();

        Ok(Sheet {
            name: name.to_string(),
            header,
            rows,
        })
    }
}

fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Result<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", name)),
    };
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .with_context(|| format!("decoding {}", name))?;
    Ok(Some(text))
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() == key || a.key.local_name().as_ref() == key {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// `(sheet name, relationship id)` in workbook order.
fn parse_sheet_list(xml: &str) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name")?.unwrap_or_default();
                let rel = attr(&e, b"id")?.unwrap_or_default();
                out.push((name, rel));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    let mut out = HashMap::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id")?, attr(&e, b"Target")?) {
                    out.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None => format!("xl/{}", target),
    }
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_item = false;
    let mut in_text = false;
    // phonetic runs carry furigana, not cell text
    let mut in_phonetic = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = true;
                    current.clear();
                }
                b"rPh" => in_phonetic = true,
                b"t" => in_text = in_item && !in_phonetic,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = false;
                    out.push(std::mem::take(&mut current));
                }
                b"rPh" => in_phonetic = false,
                b"t" => in_text = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// Zero-based column index from a reference like `AB12`.
fn column_index(cell_ref: &str) -> Option<usize> {
    let caps = CELL_REF.captures(cell_ref)?;
    let letters = caps.get(1)?.as_str();
    let mut idx = 0usize;
    for c in letters.chars() {
        idx = idx * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(idx - 1)
}

#[derive(Default)]
struct PendingCell {
    col: usize,
    kind: String,
    raw: String,
}

fn parse_sheet_cells(xml: &str, shared: &[String]) -> Result<Vec<Vec<String>>> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<PendingCell> = None;
    let mut capture = false;

    let finish_cell = |row: &mut Vec<String>, cell: PendingCell| -> Result<()> {
        let value = match cell.kind.as_str() {
            "s" => {
                let idx: usize = cell
                    .raw
                    .trim()
                    .parse()
                    .with_context(|| format!("bad shared string index `{}`", cell.raw))?;
                shared
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| anyhow!("shared string {} out of range", idx))?
            }
            "b" => (if cell.raw.trim() == "1" { "TRUE" } else { "FALSE" }).to_string(),
            _ => cell.raw,
        };
        if row.len() <= cell.col {
            row.resize(cell.col + 1, String::new());
        }
        row[cell.col] = value;
        Ok(())
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row = Vec::new(),
                b"c" => {
                    let col = attr(&e, b"r")?
                        .as_deref()
                        .and_then(column_index)
                        .unwrap_or(row.len());
                    let kind = attr(&e, b"t")?.unwrap_or_default();
                    cell = Some(PendingCell {
                        col,
                        kind,
                        raw: String::new(),
                    });
                }
                b"v" | b"t" => capture = cell.is_some(),
                _ => {}
            },
            // self-closing cells hold no value
            Event::Empty(e) if e.local_name().as_ref() == b"row" => rows.push(Vec::new()),
            Event::Text(t) if capture => {
                if let Some(c) = cell.as_mut() {
                    c.raw.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        finish_cell(&mut row, c)?;
                    }
                }
                b"row" => {
                    trace!(cells = row.len(), "row");
                    rows.push(std::mem::take(&mut row));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    for r in &mut rows {
        r.resize(width, String::new());
    }
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn escape(s: &str) -> String {
        quick_xml::escape::escape(s).into_owned()
    }

    fn col_name(mut idx: usize) -> String {
        let mut name = Vec::new();
        loop {
            name.push(b'A' + (idx % 26) as u8);
            if idx < 26 {
                break;
            }
            idx = idx / 26 - 1;
        }
        name.reverse();
        String::from_utf8(name).unwrap()
    }

    /// Build an xlsx whose first sheet uses shared strings and the rest inline strings.
    pub(crate) fn build_xlsx(sheets: &[(&str, Vec<Vec<&str>>)]) -> Vec<u8> {
        let mut shared: Vec<String> = Vec::new();
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = SimpleFileOptions::default();

            let mut workbook = String::from(
                r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
            );
            let mut rels = String::from(
                r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
            );

            for (i, (name, rows)) in sheets.iter().enumerate() {
                let n = i + 1;
                workbook.push_str(&format!(
                    r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                    escape(name),
                    n,
                    n
                ));
                rels.push_str(&format!(
                    r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                    n, n
                ));

                let mut sheet = String::from(
                    r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
                );
                for (r, cells) in rows.iter().enumerate() {
                    sheet.push_str(&format!(r#"<row r="{}">"#, r + 1));
                    for (c, text) in cells.iter().enumerate() {
                        let cref = format!("{}{}", col_name(c), r + 1);
                        if text.is_empty() {
                            continue;
                        }
                        if text.parse::<f64>().is_ok() {
                            sheet.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, cref, text));
                        } else if i == 0 {
                            shared.push(text.to_string());
                            sheet.push_str(&format!(
                                r#"<c r="{}" t="s"><v>{}</v></c>"#,
                                cref,
                                shared.len() - 1
                            ));
                        } else {
                            sheet.push_str(&format!(
                                r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                                cref,
                                escape(text)
                            ));
                        }
                    }
                    sheet.push_str("</row>");
                }
                sheet.push_str("</sheetData></worksheet>");
                zip.start_file(format!("xl/worksheets/sheet{}.xml", n), options)
                    .unwrap();
                zip.write_all(sheet.as_bytes()).unwrap();
            }
            workbook.push_str("</sheets></workbook>");
            rels.push_str("</Relationships>");

            let mut sst = String::from(
                r#"<?xml version="1.0" encoding="UTF-8"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
            );
            for s in &shared {
                sst.push_str(&format!("<si><t>{}</t></si>", escape(s)));
            }
            sst.push_str("</sst>");

            zip.start_file("xl/workbook.xml", options).unwrap();
            zip.write_all(workbook.as_bytes()).unwrap();
            zip.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
            zip.write_all(rels.as_bytes()).unwrap();
            zip.start_file("xl/sharedStrings.xml", options).unwrap();
            zip.write_all(sst.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn reads_shared_and_inline_strings() -> Result<()> {
        let bytes = build_xlsx(&[
            (
                "Regions",
                vec![
                    vec!["Country", "State", "State Code"],
                    vec!["Kenya", "Nairobi", "KEN.1"],
                    vec!["Kenya", "Mombasa & Coast", "KEN.2"],
                ],
            ),
            (
                "Variables",
                vec![
                    vec!["Code", "Variable", "Unit"],
                    vec!["tas", "Average Mean Surface Air Temperature", "°C"],
                    vec!["fd", "Frost Days", "days"],
                ],
            ),
        ]);

        let mut wb = Workbook::from_bytes(bytes)?;
        assert_eq!(wb.sheet_names(), vec!["Regions", "Variables"]);

        let regions = wb.sheet("Regions")?;
        assert_eq!(regions.header, vec!["Country", "State", "State Code"]);
        assert_eq!(regions.rows.len(), 2);
        assert_eq!(regions.rows[1][1], "Mombasa & Coast");
        assert_eq!(regions.column("State Code")?, 2);

        let vars = wb.sheet("Variables")?;
        assert_eq!(vars.rows[0][2], "°C");
        assert!(vars.column("Description").is_err());
        assert!(wb.sheet("Nope").is_err());
        Ok(())
    }

    #[test]
    fn sparse_cells_land_in_their_columns() -> Result<()> {
        let xml = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="inlineStr"><is><t>a</t></is></c><c r="C1"><v>3</v></c></row>
            <row r="2"><c r="B2" t="b"><v>1</v></c></row>
        </sheetData></worksheet>"#;
        let grid = parse_sheet_cells(xml, &[])?;
        assert_eq!(grid[0], vec!["a", "", "3"]);
        assert_eq!(grid[1], vec!["", "TRUE", ""]);
        Ok(())
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("Z9"), Some(25));
        assert_eq!(column_index("AA10"), Some(26));
        assert_eq!(column_index("$AB$3"), Some(27));
        assert_eq!(column_index("11"), None);
        assert_eq!(col_name(27), "AB");
    }
}
