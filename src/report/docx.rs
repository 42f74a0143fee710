// src/report/docx.rs

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use quick_xml::escape::escape;
use std::fmt::Write as _;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// MIME type of a `.docx` file.
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const EMU_PER_INCH: u64 = 914_400;
/// Usable width of a Letter page with 1 in margins, in twentieths of a point.
const TEXT_WIDTH_TWIPS: u32 = 9360;

const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_WP: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_PIC: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Run {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
}

impl Run {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bold: false,
            italic: false,
        }
    }

    pub fn bold_italic(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bold: true,
            italic: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table {
    pub style: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(style: impl Into<String>, header: Vec<String>) -> Self {
        Self {
            style: style.into(),
            header,
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph(Vec<Run>),
    /// Index into the document's media list plus display size in EMU.
    Picture { media: usize, cx: u64, cy: u64 },
    Table(Table),
}

/// An append-only Word document. Blocks are written in insertion order.
#[derive(Clone, Debug, Default)]
pub struct Document {
    title: String,
    blocks: Vec<Block>,
    media: Vec<Vec<u8>>,
}

impl Document {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn add_heading(&mut self, text: impl Into<String>, level: u8) {
        self.blocks.push(Block::Heading {
            level: level.clamp(1, 9),
            text: text.into(),
        });
    }

    pub fn add_paragraph(&mut self, runs: Vec<Run>) {
        self.blocks.push(Block::Paragraph(runs));
    }

    /// Append a PNG shown at its native size for `dpi`.
    pub fn add_picture(&mut self, png: Vec<u8>, width_px: u32, height_px: u32, dpi: u32) {
        let dpi = u64::from(dpi.max(1));
        let cx = u64::from(width_px) * EMU_PER_INCH / dpi;
        let cy = u64::from(height_px) * EMU_PER_INCH / dpi;
        self.media.push(png);
        self.blocks.push(Block::Picture {
            media: self.media.len() - 1,
            cx,
            cy,
        });
    }

    pub fn add_table(&mut self, table: Table) {
        self.blocks.push(Block::Table(table));
    }

    /// Serialize to a `.docx` byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        // images are already compressed
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        let parts: [(&str, String); 6] = [
            ("[Content_Types].xml", self.content_types_xml()),
            ("_rels/.rels", ROOT_RELS.to_string()),
            ("docProps/core.xml", self.core_xml()),
            ("word/document.xml", self.document_xml()),
            ("word/styles.xml", STYLES_XML.to_string()),
            ("word/_rels/document.xml.rels", self.document_rels_xml()),
        ];
        for (name, body) in parts {
            zip.start_file(name, options)
                .with_context(|| format!("starting {}", name))?;
            zip.write_all(body.as_bytes())
                .with_context(|| format!("writing {}", name))?;
        }
        for (i, png) in self.media.iter().enumerate() {
            let name = format!("word/media/image{}.png", i + 1);
            zip.start_file(name.as_str(), stored)
                .with_context(|| format!("starting {}", name))?;
            zip.write_all(png)
                .with_context(|| format!("writing {}", name))?;
        }

        let cursor = zip.finish().context("finishing docx archive")?;
        Ok(cursor.into_inner())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
    }

    fn content_types_xml(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>"#,
        );
        if !self.media.is_empty() {
            xml.push_str(r#"<Default Extension="png" ContentType="image/png"/>"#);
        }
        xml.push_str(concat!(
            r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
            r#"<Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/>"#,
            r#"<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>"#,
            "</Types>"
        ));
        xml
    }

    fn core_xml(&self) -> String {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
                "<dc:title>{}</dc:title>",
                r#"<dcterms:created xsi:type="dcterms:W3CDTF">{}</dcterms:created>"#,
                "</cp:coreProperties>"
            ),
            escape(self.title.as_str()),
            now
        )
    }

    fn document_rels_xml(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rIdStyles" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
        );
        for i in 1..=self.media.len() {
            let _ = write!(
                xml,
                r#"<Relationship Id="rIdImg{i}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image{i}.png"/>"#
            );
        }
        xml.push_str("</Relationships>");
        xml
    }

    fn document_xml(&self) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="{NS_W}" xmlns:r="{NS_R}" xmlns:wp="{NS_WP}" xmlns:a="{NS_A}" xmlns:pic="{NS_PIC}"><w:body>"#
        );
        for block in &self.blocks {
            match block {
                Block::Heading { level, text } => write_heading(&mut xml, *level, text),
                Block::Paragraph(runs) => write_paragraph(&mut xml, runs),
                Block::Picture { media, cx, cy } => write_picture(&mut xml, *media + 1, *cx, *cy),
                Block::Table(table) => write_table(&mut xml, table),
            }
        }
        xml.push_str(concat!(
            r#"<w:sectPr><w:pgSz w:w="12240" w:h="15840"/>"#,
            r#"<w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="720" w:footer="720" w:gutter="0"/>"#,
            "</w:sectPr></w:body></w:document>"
        ));
        xml
    }
}

fn write_text_run(xml: &mut String, run: &Run) {
    xml.push_str("<w:r>");
    if run.bold || run.italic {
        xml.push_str("<w:rPr>");
        if run.bold {
            xml.push_str("<w:b/>");
        }
        if run.italic {
            xml.push_str("<w:i/>");
        }
        xml.push_str("</w:rPr>");
    }
    let _ = write!(
        xml,
        r#"<w:t xml:space="preserve">{}</w:t></w:r>"#,
        escape(run.text.as_str())
    );
}

fn write_heading(xml: &mut String, level: u8, text: &str) {
    let _ = write!(xml, r#"<w:p><w:pPr><w:pStyle w:val="Heading{level}"/></w:pPr>"#);
    write_text_run(xml, &Run::plain(text));
    // trailing line break under every heading
    xml.push_str("<w:r><w:br/></w:r></w:p>");
}

fn write_paragraph(xml: &mut String, runs: &[Run]) {
    xml.push_str("<w:p>");
    for run in runs {
        write_text_run(xml, run);
    }
    xml.push_str("</w:p>");
}

fn write_picture(xml: &mut String, n: usize, cx: u64, cy: u64) {
    let _ = write!(
        xml,
        concat!(
            "<w:p><w:r><w:drawing>",
            r#"<wp:inline distT="0" distB="0" distL="0" distR="0">"#,
            r#"<wp:extent cx="{cx}" cy="{cy}"/>"#,
            r#"<wp:docPr id="{n}" name="Picture {n}"/>"#,
            r#"<wp:cNvGraphicFramePr><a:graphicFrameLocks noChangeAspect="1"/></wp:cNvGraphicFramePr>"#,
            r#"<a:graphic><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/picture">"#,
            r#"<pic:pic><pic:nvPicPr><pic:cNvPr id="{n}" name="image{n}.png"/><pic:cNvPicPr/></pic:nvPicPr>"#,
            r#"<pic:blipFill><a:blip r:embed="rIdImg{n}"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>"#,
            r#"<pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr>"#,
            "</pic:pic></a:graphicData></a:graphic></wp:inline>",
            "</w:drawing></w:r></w:p>"
        ),
        n = n,
        cx = cx,
        cy = cy
    );
}

fn write_cell(xml: &mut String, text: &str, width: u32, bold: bool) {
    let _ = write!(
        xml,
        r#"<w:tc><w:tcPr><w:tcW w:w="{width}" w:type="dxa"/></w:tcPr><w:p>"#
    );
    write_text_run(
        xml,
        &Run {
            text: text.to_string(),
            bold,
            italic: false,
        },
    );
    xml.push_str("</w:p></w:tc>");
}

fn write_table(xml: &mut String, table: &Table) {
    let cols = table
        .rows
        .iter()
        .map(|r| r.len())
        .chain(std::iter::once(table.header.len()))
        .max()
        .unwrap_or(1)
        .max(1);
    let width = TEXT_WIDTH_TWIPS / cols as u32;

    let _ = write!(
        xml,
        concat!(
            r#"<w:tbl><w:tblPr><w:tblStyle w:val="{}"/><w:tblW w:w="0" w:type="auto"/>"#,
            r#"<w:tblLook w:val="04A0" w:firstRow="1" w:lastRow="0" w:firstColumn="1" w:lastColumn="0" w:noHBand="0" w:noVBand="1"/>"#,
            "</w:tblPr><w:tblGrid>"
        ),
        escape(table.style.as_str())
    );
    for _ in 0..cols {
        let _ = write!(xml, r#"<w:gridCol w:w="{width}"/>"#);
    }
    xml.push_str("</w:tblGrid>");

    xml.push_str("<w:tr><w:trPr><w:tblHeader/></w:trPr>");
    for i in 0..cols {
        let text = table.header.get(i).map(String::as_str).unwrap_or("");
        write_cell(xml, text, width, true);
    }
    xml.push_str("</w:tr>");

    for row in &table.rows {
        xml.push_str("<w:tr>");
        for i in 0..cols {
            let text = row.get(i).map(String::as_str).unwrap_or("");
            write_cell(xml, text, width, false);
        }
        xml.push_str("</w:tr>");
    }
    xml.push_str("</w:tbl>");
}

const ROOT_RELS: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>"#,
    r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>"#,
    "</Relationships>"
);

// Normal: Calibri 11 pt, 1.15 line spacing, black. Headings share the body
// font and size, bold. ColorfulList shades the header row and bands rows.
const STYLES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#,
    r#"<w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri" w:eastAsia="Calibri" w:cs="Calibri"/><w:sz w:val="22"/><w:szCs w:val="22"/><w:lang w:val="en-US"/></w:rPr></w:rPrDefault>"#,
    r#"<w:pPrDefault><w:pPr><w:spacing w:after="200" w:line="276" w:lineRule="auto"/></w:pPr></w:pPrDefault></w:docDefaults>"#,
    r#"<w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:qFormat/>"#,
    r#"<w:pPr><w:spacing w:line="276" w:lineRule="auto"/></w:pPr>"#,
    r#"<w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri"/><w:color w:val="000000"/><w:sz w:val="22"/><w:szCs w:val="22"/></w:rPr></w:style>"#,
    r#"<w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/>"#,
    r#"<w:pPr><w:keepNext/><w:spacing w:before="480" w:after="0"/><w:outlineLvl w:val="0"/></w:pPr>"#,
    r#"<w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri"/><w:b/><w:bCs/><w:color w:val="000000"/><w:sz w:val="22"/><w:szCs w:val="22"/></w:rPr></w:style>"#,
    r#"<w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/>"#,
    r#"<w:pPr><w:keepNext/><w:spacing w:before="200" w:after="0"/><w:outlineLvl w:val="1"/></w:pPr>"#,
    r#"<w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri"/><w:b/><w:bCs/><w:color w:val="000000"/><w:sz w:val="22"/><w:szCs w:val="22"/></w:rPr></w:style>"#,
    r#"<w:style w:type="table" w:default="1" w:styleId="TableNormal"><w:name w:val="Normal Table"/>"#,
    r#"<w:tblPr><w:tblInd w:w="0" w:type="dxa"/><w:tblCellMar><w:top w:w="0" w:type="dxa"/><w:left w:w="108" w:type="dxa"/><w:bottom w:w="0" w:type="dxa"/><w:right w:w="108" w:type="dxa"/></w:tblCellMar></w:tblPr></w:style>"#,
    r#"<w:style w:type="table" w:styleId="ColorfulList"><w:name w:val="Colorful List"/><w:basedOn w:val="TableNormal"/>"#,
    r#"<w:pPr><w:spacing w:after="0" w:line="240" w:lineRule="auto"/></w:pPr>"#,
    r#"<w:tblPr><w:tblStyleRowBandSize w:val="1"/><w:tblStyleColBandSize w:val="1"/></w:tblPr>"#,
    r#"<w:tcPr><w:shd w:val="clear" w:color="auto" w:fill="E6EED5"/></w:tcPr>"#,
    r#"<w:tblStylePr w:type="firstRow"><w:rPr><w:b/><w:bCs/><w:color w:val="FFFFFF"/></w:rPr><w:tcPr><w:shd w:val="clear" w:color="auto" w:fill="9E3A38"/></w:tcPr></w:tblStylePr>"#,
    r#"<w:tblStylePr w:type="band1Horz"><w:tblPr/><w:tcPr><w:shd w:val="clear" w:color="auto" w:fill="CDDDAC"/></w:tcPr></w:tblStylePr>"#,
    "</w:style></w:styles>"
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut text = String::new();
        part.read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn writes_a_complete_package() -> Result<()> {
        let mut doc = Document::new("Kenya_Nairobi");
        doc.add_heading("Climate and Climate Change", 1);
        doc.add_paragraph(vec![Run::bold_italic("Frost Days")]);
        doc.add_picture(b"png-1".to_vec(), 1800, 900, 300);
        let mut table = Table::new("ColorfulList", vec!["Year".into(), "ERA5 value [days]".into()]);
        table.add_row(vec!["1950".into(), "  1.00".into()]);
        doc.add_table(table);

        let bytes = doc.to_bytes()?;
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))?;
        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            "docProps/core.xml",
            "word/document.xml",
            "word/styles.xml",
            "word/_rels/document.xml.rels",
            "word/media/image1.png",
        ] {
            assert!(archive.by_name(part).is_ok(), "missing {part}");
        }

        let body = read_part(&bytes, "word/document.xml");
        assert!(body.contains(r#"<w:pStyle w:val="Heading1"/>"#));
        assert!(body.contains("<w:b/><w:i/>"));
        // 6 in x 3 in
        assert!(body.contains(r#"<wp:extent cx="5486400" cy="2743200"/>"#));
        assert!(body.contains(r#"<w:tblStyle w:val="ColorfulList"/>"#));
        assert!(body.contains(">ERA5 value [days]<"));

        let rels = read_part(&bytes, "word/_rels/document.xml.rels");
        assert!(rels.contains(r#"Id="rIdImg1""#));
        assert!(read_part(&bytes, "[Content_Types].xml").contains(r#"Extension="png""#));
        Ok(())
    }

    #[test]
    fn blocks_keep_insertion_order_and_text_is_escaped() -> Result<()> {
        let mut doc = Document::new("t");
        doc.add_heading("ERA5", 2);
        doc.add_paragraph(vec![Run::plain("Days < 0 °C & \"wet\"")]);
        doc.add_heading("CMIP6", 2);

        assert!(matches!(&doc.blocks()[0], Block::Heading { level: 2, text } if text == "ERA5"));
        assert!(matches!(&doc.blocks()[2], Block::Heading { text, .. } if text == "CMIP6"));

        let body = read_part(&doc.to_bytes()?, "word/document.xml");
        assert!(body.contains("Days &lt; 0 °C &amp; &quot;wet&quot;"));
        assert!(body.find(">ERA5<").unwrap() < body.find(">CMIP6<").unwrap());
        Ok(())
    }

    #[test]
    fn short_rows_are_padded_to_the_grid() {
        let mut xml = String::new();
        let mut table = Table::new("ColorfulList", vec!["Year".into(), "A".into(), "B".into()]);
        table.add_row(vec!["2020".into()]);
        write_table(&mut xml, &table);
        assert_eq!(xml.matches("<w:gridCol").count(), 3);
        assert_eq!(xml.matches("<w:tc>").count(), 6);
    }
}
