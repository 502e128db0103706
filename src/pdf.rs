use anyhow::{bail, Result};
use pdf_writer::{Content, Finish, Name, Pdf, Rect, Ref, Str};
use serde_json::Value;

/// Turns a template id plus a data map into PDF bytes.
///
/// Rendering must be a pure function of its inputs: integrity verification re-renders a
/// contract and compares the digest with the one stored at generation time.
pub trait PdfRenderer: Send + Sync + 'static {
    fn render(&self, template_id: &str, data: &Value) -> Result<Vec<u8>>;
}

const LINES_PER_PAGE: usize = 48;
const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const FONT: Name<'static> = Name(b"F1");

/// Single-font text layout of the flattened data map, one `key: value` per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextPdfRenderer;

impl TextPdfRenderer {
    fn title(template_id: &str) -> Result<&'static str> {
        Ok(match template_id {
            "contracts/sale" => "Real Estate Sale Contract",
            "contracts/jeonse" => "Jeonse Lease Contract",
            "contracts/wolse" => "Monthly Rent Lease Contract",
            other => bail!("unknown pdf template {other}"),
        })
    }
}

impl PdfRenderer for TextPdfRenderer {
    fn render(&self, template_id: &str, data: &Value) -> Result<Vec<u8>> {
        let title = Self::title(template_id)?;

        let mut lines = Vec::new();
        flatten("", data, &mut lines);

        let pages: Vec<&[String]> = if lines.is_empty() {
            vec![lines.as_slice()]
        } else {
            lines.chunks(LINES_PER_PAGE).collect()
        };

        // 1 catalog, 2 page tree, 3 font, then (page, content) pairs. No file id or
        // info dictionary is written, so equal inputs give equal bytes.
        let catalog_id = Ref::new(1);
        let tree_id = Ref::new(2);
        let font_id = Ref::new(3);
        let page_ids: Vec<(Ref, Ref)> = (0..pages.len() as i32)
            .map(|index| (Ref::new(4 + index * 2), Ref::new(5 + index * 2)))
            .collect();

        let mut pdf = Pdf::new();
        pdf.catalog(catalog_id).pages(tree_id);
        pdf.pages(tree_id)
            .kids(page_ids.iter().map(|(page_id, _)| *page_id))
            .count(page_ids.len() as i32);
        pdf.type1_font(font_id)
            .base_font(Name(b"Helvetica"))
            .encoding_predefined(Name(b"WinAnsiEncoding"));

        let laid_out = page_ids.iter().zip(&pages).enumerate();
        for (index, ((page_id, content_id), page_lines)) in laid_out {
            let mut page = pdf.page(*page_id);
            page.media_box(Rect::new(0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT));
            page.parent(tree_id);
            page.contents(*content_id);
            page.resources().fonts().pair(FONT, font_id);
            page.finish();

            let stream = page_content(title, index + 1, pages.len(), page_lines);
            pdf.stream(*content_id, &stream);
        }

        Ok(pdf.finish())
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, nested, out);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                flatten(&format!("{prefix}[{index}]"), nested, out);
            }
        }
        Value::Null => out.push(format!("{prefix}: -")),
        Value::String(text) => out.push(format!("{prefix}: {text}")),
        other => out.push(format!("{prefix}: {other}")),
    }
}

fn page_content(title: &str, page: usize, total: usize, lines: &[String]) -> Vec<u8> {
    let mut content = Content::new();

    content.begin_text();
    content.set_font(FONT, 16.0);
    content.next_line(50.0, PAGE_HEIGHT - 60.0);
    content.show(Str(title.as_bytes()));
    content.end_text();

    content.begin_text();
    content.set_font(FONT, 10.0);
    content.set_leading(14.0);
    content.next_line(50.0, PAGE_HEIGHT - 90.0);
    for line in lines {
        content.next_line_using_leading();
        content.show(Str(line.as_bytes()));
    }
    content.end_text();

    content.begin_text();
    content.set_font(FONT, 8.0);
    content.next_line(50.0, 30.0);
    content.show(Str(format!("page {page} / {total}").as_bytes()));
    content.end_text();

    content.finish()
}
