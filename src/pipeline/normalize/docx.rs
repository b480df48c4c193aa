//! DOCX extraction: paragraphs and table rows in document order.
//!
//! The body is parsed with `docx_rs` and walked as a tree. Tables nested in a
//! cell are flattened into that cell; text boxes anchored in a paragraph are
//! emitted as their own blocks right after it. Table cells are joined with
//! ` | `.

use std::io::{Cursor, Read};
use std::sync::LazyLock;

use docx_rs::{
    DocumentChild, DrawingData, InsertChild, Paragraph, ParagraphChild, Run, RunChild, Table,
    TableCellContent, TableChild, TableRowChild, TextBoxContentChild,
};
use regex::Regex;

use super::sanitize::sanitize_line;
use super::types::ExtractedLayout;
use super::NormalizeError;
use crate::models::{BlockSource, TextBlock};

const DOCX_CONFIDENCE: f32 = 0.99;
const CELL_SEPARATOR: &str = " | ";
const DOCUMENT_PART: &str = "word/document.xml";

static PAGE_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Pages>\s*(\d+)\s*</Pages>").unwrap());
static CHAR_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9A-Fa-f]+|[0-9]+);").unwrap());

/// Extract paragraphs and table rows from DOCX bytes.
pub fn extract_docx_layout(bytes: &[u8]) -> Result<ExtractedLayout, NormalizeError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| NormalizeError::CorruptDocument(format!("DOCX container: {e}")))?;
    if archive.index_for_name(DOCUMENT_PART).is_none() {
        return Err(NormalizeError::CorruptDocument(format!(
            "DOCX has no {DOCUMENT_PART}"
        )));
    }
    let page_count = read_entry(&mut archive, "docProps/app.xml")
        .ok()
        .flatten()
        .and_then(|xml| parse_page_count(&xml))
        .unwrap_or(1);

    let docx = docx_rs::read_docx(bytes)
        .map_err(|e| NormalizeError::CorruptDocument(format!("{DOCUMENT_PART}: {e:?}")))?;

    let mut builder = LayoutBuilder::default();
    for child in &docx.document.children {
        match child {
            DocumentChild::Paragraph(p) => builder.paragraph(p),
            DocumentChild::Table(t) => builder.table(t),
            _ => {}
        }
    }

    tracing::debug!(blocks = builder.blocks.len(), page_count, "DOCX body extracted");

    Ok(ExtractedLayout {
        blocks: builder.blocks,
        page_count,
        warnings: vec![],
    })
}

#[derive(Default)]
struct LayoutBuilder {
    blocks: Vec<TextBlock>,
}

impl LayoutBuilder {
    fn paragraph(&mut self, paragraph: &Paragraph) {
        let content = ParagraphContent::of(paragraph);
        self.push(content.text(), BlockSource::Paragraph);
        for item in content.text_boxes {
            match item {
                TextBoxContentChild::Paragraph(p) => self.paragraph(p),
                TextBoxContentChild::Table(t) => self.table(t),
            }
        }
    }

    fn table(&mut self, table: &Table) {
        for row in table_rows(table) {
            self.push(row, BlockSource::TableRow);
        }
    }

    fn push(&mut self, text: String, source: BlockSource) {
        if text.is_empty() {
            return;
        }
        // DOCX has no reliable page boundaries in the XML; everything is page 0.
        let index = self.blocks.len();
        self.blocks.push(TextBlock {
            page: 0,
            index,
            text,
            bounding_box: None,
            source,
            confidence: DOCX_CONFIDENCE,
        });
    }
}

/// Text of one paragraph plus the text boxes anchored inside its runs.
#[derive(Default)]
struct ParagraphContent<'a> {
    raw: String,
    text_boxes: Vec<&'a TextBoxContentChild>,
}

impl<'a> ParagraphContent<'a> {
    fn of(paragraph: &'a Paragraph) -> Self {
        let mut content = Self::default();
        for child in &paragraph.children {
            content.collect_child(child);
        }
        content
    }

    fn collect_child(&mut self, child: &'a ParagraphChild) {
        match child {
            ParagraphChild::Run(run) => self.collect_run(run),
            ParagraphChild::Hyperlink(link) => {
                for nested in &link.children {
                    self.collect_child(nested);
                }
            }
            ParagraphChild::Insert(insert) => {
                for item in &insert.children {
                    if let InsertChild::Run(run) = item {
                        self.collect_run(run);
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_run(&mut self, run: &'a Run) {
        for child in &run.children {
            match child {
                RunChild::Text(t) => self.raw.push_str(&unescape_xml(&t.text)),
                RunChild::Tab(_) => self.raw.push('\t'),
                RunChild::Break(_) => self.raw.push('\n'),
                RunChild::Drawing(drawing) => {
                    if let Some(DrawingData::TextBox(text_box)) = &drawing.data {
                        self.text_boxes.extend(text_box.children.iter());
                    }
                }
                _ => {}
            }
        }
    }

    fn text(&self) -> String {
        self.raw
            .lines()
            .map(sanitize_line)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One string per non-empty row, cells joined with the separator.
fn table_rows(table: &Table) -> Vec<String> {
    let mut rows = Vec::new();
    for row in &table.rows {
        let TableChild::TableRow(row) = row;
        let cells: Vec<String> = row
            .cells
            .iter()
            .map(|cell| {
                let TableRowChild::TableCell(cell) = cell;
                cell_text(&cell.children)
            })
            .filter(|t| !t.is_empty())
            .collect();
        if !cells.is_empty() {
            rows.push(cells.join(CELL_SEPARATOR));
        }
    }
    rows
}

/// Flatten a cell, nested tables and text boxes included, into one line.
fn cell_text(children: &[TableCellContent]) -> String {
    let mut parts = Vec::new();
    for child in children {
        match child {
            TableCellContent::Paragraph(p) => flatten_paragraph(p, &mut parts),
            TableCellContent::Table(t) => parts.extend(table_rows(t)),
            _ => {}
        }
    }
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn flatten_paragraph(paragraph: &Paragraph, parts: &mut Vec<String>) {
    let content = ParagraphContent::of(paragraph);
    parts.push(content.text().replace('\n', " "));
    for item in content.text_boxes {
        match item {
            TextBoxContentChild::Paragraph(p) => flatten_paragraph(p, parts),
            TextBoxContentChild::Table(t) => parts.extend(table_rows(t)),
        }
    }
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<String>, NormalizeError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(NormalizeError::CorruptDocument(format!("{name}: {e}"))),
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| NormalizeError::CorruptDocument(format!("{name}: {e}")))?;
    Ok(Some(content))
}

fn parse_page_count(app_xml: &str) -> Option<usize> {
    PAGE_COUNT
        .captures(app_xml)
        .and_then(|c| c[1].parse::<usize>().ok())
        .filter(|&n| n > 0)
}

/// Resolve entity references left in run text.
fn unescape_xml(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let numeric = CHAR_REF.replace_all(text, |caps: &regex::Captures| {
        let reference = &caps[1];
        let code = match reference.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => reference.parse::<u32>().ok(),
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    numeric
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;
    const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;
    const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#;

    /// Build a minimal DOCX package with the given body XML.
    pub(crate) fn make_docx(body: &str, pages: Option<u32>) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("[Content_Types].xml", options).unwrap();
        writer.write_all(CONTENT_TYPES.as_bytes()).unwrap();
        writer.start_file("_rels/.rels", options).unwrap();
        writer.write_all(PACKAGE_RELS.as_bytes()).unwrap();
        writer
            .start_file("word/_rels/document.xml.rels", options)
            .unwrap();
        writer.write_all(DOCUMENT_RELS.as_bytes()).unwrap();
        writer.start_file(DOCUMENT_PART, options).unwrap();
        write!(
            writer,
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:wp="http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:wps="http://schemas.microsoft.com/office/word/2010/wordprocessingShape"><w:body>{body}</w:body></w:document>"#
        )
        .unwrap();
        if let Some(pages) = pages {
            writer.start_file("docProps/app.xml", options).unwrap();
            write!(writer, "<Properties><Pages>{pages}</Pages></Properties>").unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    pub(crate) fn para(text: &str) -> String {
        format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
    }

    fn cell(inner: &str) -> String {
        format!("<w:tc><w:tcPr/>{inner}</w:tc>")
    }

    fn texts(layout: &ExtractedLayout) -> Vec<(&str, BlockSource)> {
        layout
            .blocks
            .iter()
            .map(|b| (b.text.as_str(), b.source))
            .collect()
    }

    #[test]
    fn paragraphs_and_tables_in_document_order() {
        let body = format!(
            "{}<w:tbl><w:tr>{}{}</w:tr><w:tr>{}{}</w:tr></w:tbl>{}",
            para("FACTURA 2024-001"),
            cell(&para("Concepto")),
            cell(&para("Importe")),
            cell(&para("Consultoría")),
            cell(&para("100,00")),
            para("Total: 121,00 €"),
        );
        let layout = extract_docx_layout(&make_docx(&body, None)).unwrap();
        let texts: Vec<_> = layout.blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "FACTURA 2024-001",
                "Concepto | Importe",
                "Consultoría | 100,00",
                "Total: 121,00 €"
            ]
        );
        assert_eq!(layout.blocks[1].source, BlockSource::TableRow);
        assert_eq!(layout.blocks[3].index, 3);
        assert_eq!(layout.page_count, 1);
    }

    #[test]
    fn runs_are_concatenated_and_entities_unescaped() {
        let body = r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:t xml:space="preserve">Smith &amp; </w:t></w:r><w:r><w:t>Sons &#8211; Ltd</w:t></w:r></w:p>"#;
        let layout = extract_docx_layout(&make_docx(body, None)).unwrap();
        assert_eq!(layout.blocks[0].text, "Smith & Sons – Ltd");
    }

    #[test]
    fn text_box_does_not_cut_its_paragraph_short() {
        let body = r#"<w:p><w:r><w:t>Proveedor: ACME</w:t></w:r><w:r><w:drawing><wp:anchor><wp:extent cx="914400" cy="914400"/><a:graphic><a:graphicData uri="http://schemas.microsoft.com/office/word/2010/wordprocessingShape"><wps:wsp><wps:txbx><w:txbxContent><w:p><w:r><w:t>LOGO</w:t></w:r></w:p></w:txbxContent></wps:txbx></wps:wsp></a:graphicData></a:graphic></wp:anchor></w:drawing></w:r><w:r><w:t xml:space="preserve"> Total: 121,00</w:t></w:r></w:p>"#;
        let layout = extract_docx_layout(&make_docx(body, None)).unwrap();
        let texts = texts(&layout);
        assert_eq!(texts[0], ("Proveedor: ACME Total: 121,00", BlockSource::Paragraph));
        // Text box content, when present, follows its paragraph on its own.
        assert!(texts[1..].iter().all(|(t, _)| *t == "LOGO"));
    }

    #[test]
    fn nested_table_stays_inside_its_cell() {
        let inner = format!("<w:tbl><w:tr>{}</w:tr></w:tbl>", cell(&para("inner")));
        let body = format!(
            "<w:tbl><w:tr>{}{}</w:tr></w:tbl>{}",
            cell(&format!("{}{inner}", para("A"))),
            cell(&para("B")),
            para("after"),
        );
        let layout = extract_docx_layout(&make_docx(&body, None)).unwrap();
        assert_eq!(
            texts(&layout),
            vec![
                ("A inner | B", BlockSource::TableRow),
                ("after", BlockSource::Paragraph)
            ]
        );
    }

    #[test]
    fn hyperlink_text_is_kept() {
        let body = r#"<w:p><w:r><w:t xml:space="preserve">Contacto: </w:t></w:r><w:hyperlink w:anchor="top"><w:r><w:t>ana@example.com</w:t></w:r></w:hyperlink></w:p>"#;
        let layout = extract_docx_layout(&make_docx(body, None)).unwrap();
        assert_eq!(layout.blocks[0].text, "Contacto: ana@example.com");
    }

    #[test]
    fn empty_paragraphs_and_cells_skipped() {
        let body = format!(
            "<w:p/>{}<w:tbl><w:tr>{}<w:tc><w:p/></w:tc>{}</w:tr></w:tbl>",
            para("   "),
            cell(&para("A")),
            cell(&para("B"))
        );
        let layout = extract_docx_layout(&make_docx(&body, None)).unwrap();
        assert_eq!(layout.blocks.len(), 1);
        assert_eq!(layout.blocks[0].text, "A | B");
    }

    #[test]
    fn page_count_from_app_properties() {
        let layout = extract_docx_layout(&make_docx(&para("x"), Some(3))).unwrap();
        assert_eq!(layout.page_count, 3);
    }

    #[test]
    fn line_breaks_split_lines() {
        let body = r#"<w:p><w:r><w:t>Line one</w:t><w:br/><w:t>Line two</w:t></w:r></w:p>"#;
        let layout = extract_docx_layout(&make_docx(body, None)).unwrap();
        assert_eq!(layout.blocks[0].text, "Line one\nLine two");
    }

    #[test]
    fn not_a_zip_is_corrupt() {
        let err = extract_docx_layout(b"PK\x03\x04garbage").unwrap_err();
        assert!(matches!(err, NormalizeError::CorruptDocument(_)));
    }

    #[test]
    fn zip_without_document_is_corrupt() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"hello").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let err = extract_docx_layout(&bytes).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn unescape_handles_hex_and_named() {
        assert_eq!(unescape_xml("&lt;a&gt; &#x41;&#66; &quot;q&quot;"), "<a> AB \"q\"");
        assert_eq!(unescape_xml("&amp;lt;"), "&lt;");
    }
}
