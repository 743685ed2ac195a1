//! Minimal PDF 1.4 writer: A4 pages, Helvetica, wrapped text.

use super::MemoDocument;
use crate::config::app_config::ExportConfig;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 56.0;
/// Average Helvetica glyph width as a fraction of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(&self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

#[derive(Debug, Clone)]
struct Line {
    text: String,
    size: f32,
    font: Font,
    indent: f32,
}

/// Lays out lines into pages and serialises them.
struct PdfBuilder {
    body_size: f32,
    line_height: f32,
    pages: Vec<Vec<(f32, Line)>>,
    cursor: f32,
}

impl PdfBuilder {
    fn new(config: &ExportConfig) -> Self {
        Self {
            body_size: config.pdf_font_size.clamp(6.0, 24.0),
            line_height: config.pdf_line_height.clamp(1.0, 3.0),
            pages: vec![Vec::new()],
            cursor: PAGE_HEIGHT - MARGIN,
        }
    }

    fn push_line(&mut self, line: Line) {
        let advance = line.size * self.line_height;
        if self.cursor - advance < MARGIN {
            self.pages.push(Vec::new());
            self.cursor = PAGE_HEIGHT - MARGIN;
        }
        self.cursor -= advance;
        let y = self.cursor;
        if let Some(page) = self.pages.last_mut() {
            page.push((y, line));
        }
    }

    fn space(&mut self, points: f32) {
        self.cursor -= points;
    }

    fn paragraph(&mut self, text: &str, size: f32, font: Font, indent: f32) {
        let usable = PAGE_WIDTH - 2.0 * MARGIN - indent;
        let max_chars = ((usable / (size * AVG_GLYPH_WIDTH)) as usize).max(10);
        for text in wrap(text, max_chars) {
            self.push_line(Line {
                text,
                size,
                font,
                indent,
            });
        }
    }

    fn heading(&mut self, text: &str) {
        self.space(self.body_size * 0.8);
        self.paragraph(text, self.body_size + 3.0, Font::Bold, 0.0);
    }

    fn body(&mut self, text: &str) {
        self.paragraph(text, self.body_size, Font::Regular, 0.0);
    }

    fn bullet(&mut self, title: &str, detail: &str) {
        self.paragraph(&format!("- {}", title), self.body_size, Font::Bold, 0.0);
        if !detail.is_empty() {
            self.paragraph(detail, self.body_size, Font::Regular, 14.0);
        }
    }

    fn finish(self) -> Vec<u8> {
        let page_count = self.pages.len();
        // 1 catalog, 2 pages, 3-4 fonts, then a page + content pair per page
        let page_id = |i: usize| 5 + 2 * i;
        let content_id = |i: usize| 6 + 2 * i;

        let mut objects: Vec<Vec<u8>> = Vec::new();
        objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
        let kids = (0..page_count)
            .map(|i| format!("{} 0 R", page_id(i)))
            .collect::<Vec<_>>()
            .join(" ");
        objects.push(format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids, page_count).into_bytes());
        objects.push(
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_vec(),
        );
        objects.push(
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
                .to_vec(),
        );

        for (i, page) in self.pages.iter().enumerate() {
            objects.push(
                format!(
                    "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
                    PAGE_WIDTH,
                    PAGE_HEIGHT,
                    content_id(i)
                )
                .into_bytes(),
            );

            let mut stream = Vec::new();
            for (y, line) in page {
                stream.extend_from_slice(
                    format!(
                        "BT /{} {:.1} Tf {:.1} {:.1} Td (",
                        line.font.resource(),
                        line.size,
                        MARGIN + line.indent,
                        y
                    )
                    .as_bytes(),
                );
                stream.extend(encode_text(&line.text));
                stream.extend_from_slice(b") Tj ET\n");
            }
            let mut object = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
            object.extend(stream);
            object.extend_from_slice(b"\nendstream");
            objects.push(object);
        }

        let mut out = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, object) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
            out.extend_from_slice(object);
            out.extend_from_slice(b"\nendobj\n");
        }

        let xref_offset = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_offset
            )
            .as_bytes(),
        );
        out
    }
}

/// Greedy word wrap at `max_chars`; over-long words are hard-split.
pub fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > max_chars && current_len > 0 {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current_len += word.len();
        current.extend(word);
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// WinAnsi bytes for a PDF literal string; unsupported chars become '?'.
fn encode_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        let byte = match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                c as u8
            }
            '\u{2018}' | '\u{2019}' => b'\'',
            '\u{201C}' | '\u{201D}' => b'"',
            '\u{2013}' | '\u{2014}' => b'-',
            '\u{2022}' => 0x95,
            c if (c as u32) >= 0x20 && (c as u32) < 0x7F => c as u8,
            c if (c as u32) >= 0xA0 && (c as u32) <= 0xFF => c as u32 as u8,
            _ => b'?',
        };
        out.push(byte);
    }
    out
}

pub fn render_memo(doc: &MemoDocument<'_>, config: &ExportConfig) -> Vec<u8> {
    let memo = doc.memo;
    let mut pdf = PdfBuilder::new(config);

    pdf.paragraph(&doc.title(), pdf.body_size + 9.0, Font::Bold, 0.0);
    pdf.body(&format!(
        "Generated {}  |  Run #{}  |  {} sources",
        memo.created_at.format("%Y-%m-%d %H:%M UTC"),
        memo.run_id,
        doc.sources.len()
    ));

    pdf.heading("Executive Summary");
    for line in memo.tldr.lines().filter(|l| !l.trim().is_empty()) {
        pdf.body(line);
    }

    pdf.heading("Key Risks");
    for (i, risk) in memo.risks.iter().enumerate() {
        pdf.bullet(
            &format!("Risk {}: {} ({}, {:.0}% confidence)", i + 1, risk.risk, risk.severity, risk.confidence * 100.0),
            &format!("{} {}", risk.rationale, doc.citations(&risk.source_ids)).trim_end().to_string(),
        );
    }

    pdf.heading("Key Opportunities");
    for (i, opp) in memo.opportunities.iter().enumerate() {
        pdf.bullet(
            &format!(
                "Opportunity {}: {} ({} impact, {:.0}% confidence)",
                i + 1,
                opp.opportunity,
                opp.potential_impact,
                opp.confidence * 100.0
            ),
            &format!("{} {}", opp.rationale, doc.citations(&opp.source_ids)).trim_end().to_string(),
        );
    }

    if !memo.metrics.is_empty() {
        pdf.heading("Key Metrics");
        for m in &memo.metrics {
            pdf.bullet(
                &format!("{}: {} ({}, {})", m.metric, m.value, m.trend, m.period),
                m.context.as_deref().unwrap_or(""),
            );
        }
    }

    if let Some(tech) = doc.technical.filter(|t| !t.insights.is_empty()) {
        pdf.heading("Technical Analysis");
        for insight in &tech.insights {
            pdf.bullet(&format!("{}: {}", insight.kind, insight.signal), &insight.description);
        }
    }

    if doc.include_sources && !doc.sources.is_empty() {
        pdf.heading("Data Sources");
        for (i, source) in doc.sources.iter().enumerate() {
            let mut detail = source.source_type.label();
            if let Some(date) = source.published_at {
                detail.push_str(&format!(" | {}", date.format("%Y-%m-%d")));
            }
            if let Some(url) = &source.url {
                detail.push_str(&format!(" | {}", url));
            }
            pdf.bullet(
                &format!("[{}] {}", i + 1, source.title.as_deref().unwrap_or("Untitled")),
                &detail,
            );
        }
    }

    pdf.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures;

    fn as_text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("one two three four", 9), vec!["one two", "three", "four"]);
        assert_eq!(wrap("abcdefghijkl", 5), vec!["abcde", "fghij", "kl"]);
        assert!(wrap("   ", 10).is_empty());
    }

    #[test]
    fn test_encode_escapes_and_replaces() {
        assert_eq!(encode_text("a(b)\\"), b"a\\(b\\)\\\\".to_vec());
        assert_eq!(encode_text("caf\u{e9} \u{2014} \u{4e2d}"), vec![b'c', b'a', b'f', 0xE9, b' ', b'-', b' ', b'?']);
    }

    #[test]
    fn test_render_memo_structure() {
        let memo = fixtures::memo(5);
        let sources = fixtures::sources(5);
        let bytes = render_memo(&MemoDocument::new("AAPL", &memo, &sources), &ExportConfig::default());
        let text = as_text(&bytes);

        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.trim_end().ends_with("%%EOF"));
        assert!(text.contains("(AAPL Analysis Report) Tj"));
        assert!(text.contains("Risk 1: Supply chain <constraints>"));
        assert!(text.contains("/BaseFont /Helvetica-Bold"));

        // xref offsets point at object headers
        let xref_at: usize = text
            .rsplit("startxref\n")
            .next()
            .and_then(|s| s.lines().next())
            .and_then(|s| s.parse().ok())
            .unwrap();
        assert!(bytes[xref_at..].starts_with(b"xref"));
        let table = as_text(&bytes[xref_at..]);
        let first_entry = table.lines().nth(3).unwrap();
        let offset: usize = first_entry[..10].parse().unwrap();
        assert!(bytes[offset..].starts_with(b"1 0 obj"));
    }

    #[test]
    fn test_long_memo_spans_pages() {
        let mut memo = fixtures::memo(5);
        memo.tldr = (0..200).map(|i| format!("Summary line {}", i)).collect::<Vec<_>>().join("\n");
        let sources = fixtures::sources(5);
        let text = as_text(&render_memo(&MemoDocument::new("AAPL", &memo, &sources), &ExportConfig::default()));
        let pages = text.matches("/Type /Page ").count();
        assert!(pages >= 3, "expected several pages, got {}", pages);
        assert!(text.contains("/Count"));
    }
}
