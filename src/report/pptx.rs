//! PowerPoint (OOXML) deck packaged with `zip`.

use super::html::escape as xml_escape;
use super::MemoDocument;
use crate::config::app_config::ExportConfig;
use crate::utils::error::Result;
use std::io::{Cursor, Write};
use zip::write::{FileOptions, ZipWriter};

const EMU_PER_INCH: f32 = 914_400.0;
const SOURCES_PER_SLIDE: usize = 10;
const MAX_RATIONALE_CHARS: usize = 160;

const NS: &str = r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main""#;
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const REL_TYPE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const EMPTY_TREE: &str = r#"<p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr/>"#;

#[derive(Debug, Clone)]
struct Paragraph {
    text: String,
    level: u8,
    bold: bool,
}

impl Paragraph {
    fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), level: 0, bold: false }
    }

    fn strong(text: impl Into<String>) -> Self {
        Self { text: text.into(), level: 0, bold: true }
    }

    fn sub(text: impl Into<String>) -> Self {
        Self { text: text.into(), level: 1, bold: false }
    }
}

#[derive(Debug, Clone)]
struct Slide {
    title: String,
    body: Vec<Paragraph>,
}

fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max.saturating_sub(3)).collect::<String>() + "..."
    }
}

fn build_slides(doc: &MemoDocument<'_>) -> Vec<Slide> {
    let memo = doc.memo;
    let mut slides = vec![Slide {
        title: doc.title(),
        body: vec![
            Paragraph::plain(format!("Generated {}", memo.created_at.format("%Y-%m-%d %H:%M UTC"))),
            Paragraph::plain(format!("Run #{} · {} sources analysed", memo.run_id, doc.sources.len())),
        ],
    }];

    slides.push(Slide {
        title: "Executive Summary".to_string(),
        body: memo
            .tldr
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(Paragraph::plain)
            .collect(),
    });

    let mut risks = Vec::new();
    for risk in &memo.risks {
        risks.push(Paragraph::strong(format!("{} ({})", risk.risk, risk.severity)));
        risks.push(Paragraph::sub(shorten(&risk.rationale, MAX_RATIONALE_CHARS)));
    }
    slides.push(Slide { title: "Key Risks".to_string(), body: risks });

    let mut opportunities = Vec::new();
    for opp in &memo.opportunities {
        opportunities.push(Paragraph::strong(format!("{} ({} impact)", opp.opportunity, opp.potential_impact)));
        opportunities.push(Paragraph::sub(shorten(&opp.rationale, MAX_RATIONALE_CHARS)));
    }
    slides.push(Slide { title: "Key Opportunities".to_string(), body: opportunities });

    if !memo.metrics.is_empty() {
        slides.push(Slide {
            title: "Key Metrics".to_string(),
            body: memo
                .metrics
                .iter()
                .map(|m| Paragraph::plain(format!("{}: {} ({}, {})", m.metric, m.value, m.trend, m.period)))
                .collect(),
        });
    }

    if let Some(tech) = doc.technical.filter(|t| !t.insights.is_empty()) {
        slides.push(Slide {
            title: "Technical Analysis".to_string(),
            body: tech
                .insights
                .iter()
                .map(|i| Paragraph::plain(format!("{}: {} - {}", i.kind, i.signal, i.description)))
                .collect(),
        });
    }

    if doc.include_sources && !doc.sources.is_empty() {
        let pages = doc.sources.chunks(SOURCES_PER_SLIDE).count();
        for (page, group) in doc.sources.chunks(SOURCES_PER_SLIDE).enumerate() {
            let title = if pages > 1 {
                format!("Data Sources ({}/{})", page + 1, pages)
            } else {
                "Data Sources".to_string()
            };
            let body = group
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    Paragraph::plain(format!(
                        "[{}] {} ({})",
                        page * SOURCES_PER_SLIDE + i + 1,
                        shorten(s.title.as_deref().unwrap_or("Untitled"), 90),
                        s.source_type.label()
                    ))
                })
                .collect();
            slides.push(Slide { title, body });
        }
    }

    slides
}

struct Geometry {
    width: u64,
    height: u64,
    title_size: u32,
    body_size: u32,
}

impl Geometry {
    fn from_config(config: &ExportConfig) -> Self {
        Self {
            width: (config.pptx_slide_width_in * EMU_PER_INCH) as u64,
            height: (config.pptx_slide_height_in * EMU_PER_INCH) as u64,
            title_size: config.pptx_title_font_size * 100,
            body_size: config.pptx_body_font_size * 100,
        }
    }
}

fn text_box(id: u32, name: &str, x: u64, y: u64, cx: u64, cy: u64, paragraphs: &str) -> String {
    format!(
        r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="{name}"/><p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr><p:spPr><a:xfrm><a:off x="{x}" y="{y}"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr><p:txBody><a:bodyPr wrap="square"><a:normAutofit/></a:bodyPr><a:lstStyle/>{paragraphs}</p:txBody></p:sp>"#
    )
}

fn run(text: &str, size: u32, bold: bool) -> String {
    format!(
        r#"<a:r><a:rPr lang="en-US" sz="{}"{} dirty="0"/><a:t>{}</a:t></a:r>"#,
        size,
        if bold { r#" b="1""# } else { "" },
        xml_escape(text)
    )
}

fn slide_xml(slide: &Slide, g: &Geometry) -> String {
    let margin = g.width / 18;
    let inner = g.width - 2 * margin;
    let title_h = g.height / 6;

    let title = format!(r#"<a:p>{}</a:p>"#, run(&slide.title, g.title_size, true));
    let body: String = slide
        .body
        .iter()
        .map(|p| {
            let size = if p.level > 0 { g.body_size * 3 / 4 } else { g.body_size };
            let indent = if p.level > 0 {
                format!(r#"<a:pPr lvl="{}" marL="{}"/>"#, p.level, 342_900 * p.level as u64)
            } else {
                String::new()
            };
            format!("<a:p>{}{}</a:p>", indent, run(&p.text, size, p.bold))
        })
        .collect();
    let body = if body.is_empty() { "<a:p/>".to_string() } else { body };

    format!(
        "{XML_DECL}<p:sld {NS}><p:cSld><p:spTree>{EMPTY_TREE}{}{}</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>",
        text_box(2, "Title", margin, margin / 2, inner, title_h, &title),
        text_box(3, "Content", margin, margin / 2 + title_h, inner, g.height - title_h - margin, &body),
    )
}

fn relationships(entries: &[(String, &str, String)]) -> String {
    let rels: String = entries
        .iter()
        .map(|(id, kind, target)| format!(r#"<Relationship Id="{}" Type="{}/{}" Target="{}"/>"#, id, REL_TYPE, kind, target))
        .collect();
    format!(r#"{XML_DECL}<Relationships xmlns="{REL_NS}">{rels}</Relationships>"#)
}

fn content_types(slide_count: usize) -> String {
    let slides: String = (1..=slide_count)
        .map(|i| format!(r#"<Override PartName="/ppt/slides/slide{}.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slide+xml"/>"#, i))
        .collect();
    format!(
        r#"{XML_DECL}<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/ppt/presentation.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"/><Override PartName="/ppt/slideMasters/slideMaster1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml"/><Override PartName="/ppt/slideLayouts/slideLayout1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml"/><Override PartName="/ppt/theme/theme1.xml" ContentType="application/vnd.openxmlformats-officedocument.theme+xml"/>{slides}<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/><Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/></Types>"#
    )
}

fn presentation(slide_count: usize, g: &Geometry) -> String {
    let ids: String = (0..slide_count)
        .map(|i| format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 256 + i, i + 3))
        .collect();
    format!(
        r#"{XML_DECL}<p:presentation {NS} saveSubsetFonts="1"><p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst><p:sldIdLst>{ids}</p:sldIdLst><p:sldSz cx="{}" cy="{}"/><p:notesSz cx="6858000" cy="9144000"/></p:presentation>"#,
        g.width, g.height
    )
}

fn slide_master() -> String {
    format!(
        r#"{XML_DECL}<p:sldMaster {NS}><p:cSld><p:bg><p:bgRef idx="1001"><a:schemeClr val="bg1"/></p:bgRef></p:bg><p:spTree>{EMPTY_TREE}</p:spTree></p:cSld><p:clrMap bg1="lt1" tx1="dk1" bg2="lt2" tx2="dk2" accent1="accent1" accent2="accent2" accent3="accent3" accent4="accent4" accent5="accent5" accent6="accent6" hlink="hlink" folHlink="folHlink"/><p:sldLayoutIdLst><p:sldLayoutId id="2147483649" r:id="rId1"/></p:sldLayoutIdLst></p:sldMaster>"#
    )
}

fn slide_layout() -> String {
    format!(
        r#"{XML_DECL}<p:sldLayout {NS} type="blank" preserve="1"><p:cSld name="Blank"><p:spTree>{EMPTY_TREE}</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sldLayout>"#
    )
}

fn theme() -> String {
    let colors = [
        ("dk1", "000000"),
        ("lt1", "FFFFFF"),
        ("dk2", "1F2933"),
        ("lt2", "F5F7FA"),
        ("accent1", "3E63DD"),
        ("accent2", "26A69A"),
        ("accent3", "FB8C00"),
        ("accent4", "EF5350"),
        ("accent5", "8E24AA"),
        ("accent6", "1E88E5"),
        ("hlink", "3E63DD"),
        ("folHlink", "8E24AA"),
    ]
    .iter()
    .map(|(name, rgb)| format!(r#"<a:{name}><a:srgbClr val="{rgb}"/></a:{name}>"#))
    .collect::<String>();
    let font = |face: &str| format!(r#"<a:latin typeface="{face}"/><a:ea typeface=""/><a:cs typeface=""/>"#);
    let solid = r#"<a:solidFill><a:schemeClr val="phClr"/></a:solidFill>"#;
    let line = r#"<a:ln w="9525"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln>"#;
    let effect = "<a:effectStyle><a:effectLst/></a:effectStyle>";

    format!(
        r#"{XML_DECL}<a:theme xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" name="Research"><a:themeElements><a:clrScheme name="Research">{colors}</a:clrScheme><a:fontScheme name="Research"><a:majorFont>{}</a:majorFont><a:minorFont>{}</a:minorFont></a:fontScheme><a:fmtScheme name="Research"><a:fillStyleLst>{solid}{solid}{solid}</a:fillStyleLst><a:lnStyleLst>{line}{line}{line}</a:lnStyleLst><a:effectStyleLst>{effect}{effect}{effect}</a:effectStyleLst><a:bgFillStyleLst>{solid}{solid}{solid}</a:bgFillStyleLst></a:fmtScheme></a:themeElements></a:theme>"#,
        font("Calibri Light"),
        font("Calibri")
    )
}

fn core_props(title: &str, created: &str) -> String {
    format!(
        r#"{XML_DECL}<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><dc:title>{}</dc:title><dc:creator>research-analyst</dc:creator><dcterms:created xsi:type="dcterms:W3CDTF">{}</dcterms:created></cp:coreProperties>"#,
        xml_escape(title),
        created
    )
}

fn app_props(slide_count: usize) -> String {
    format!(
        r#"{XML_DECL}<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties"><Application>research-analyst</Application><Slides>{}</Slides></Properties>"#,
        slide_count
    )
}

pub fn render_memo(doc: &MemoDocument<'_>, config: &ExportConfig) -> Result<Vec<u8>> {
    let slides = build_slides(doc);
    let geometry = Geometry::from_config(config);
    let count = slides.len();

    let mut parts: Vec<(String, String)> = vec![
        ("[Content_Types].xml".into(), content_types(count)),
        (
            "_rels/.rels".into(),
            relationships(&[
                ("rId1".into(), "officeDocument", "ppt/presentation.xml".into()),
                ("rId2".into(), "metadata/core-properties", "docProps/core.xml".into()),
                ("rId3".into(), "extended-properties", "docProps/app.xml".into()),
            ]),
        ),
        (
            "docProps/core.xml".into(),
            core_props(&doc.title(), &doc.memo.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        ),
        ("docProps/app.xml".into(), app_props(count)),
        ("ppt/presentation.xml".into(), presentation(count, &geometry)),
        ("ppt/slideMasters/slideMaster1.xml".into(), slide_master()),
        (
            "ppt/slideMasters/_rels/slideMaster1.xml.rels".into(),
            relationships(&[
                ("rId1".into(), "slideLayout", "../slideLayouts/slideLayout1.xml".into()),
                ("rId2".into(), "theme", "../theme/theme1.xml".into()),
            ]),
        ),
        ("ppt/slideLayouts/slideLayout1.xml".into(), slide_layout()),
        (
            "ppt/slideLayouts/_rels/slideLayout1.xml.rels".into(),
            relationships(&[("rId1".into(), "slideMaster", "../slideMasters/slideMaster1.xml".into())]),
        ),
        ("ppt/theme/theme1.xml".into(), theme()),
    ];

    let mut presentation_rels = vec![
        ("rId1".to_string(), "slideMaster", "slideMasters/slideMaster1.xml".to_string()),
        ("rId2".to_string(), "theme", "theme/theme1.xml".to_string()),
    ];
    for (i, slide) in slides.iter().enumerate() {
        let n = i + 1;
        parts.push((format!("ppt/slides/slide{}.xml", n), slide_xml(slide, &geometry)));
        parts.push((
            format!("ppt/slides/_rels/slide{}.xml.rels", n),
            relationships(&[("rId1".into(), "slideLayout", "../slideLayouts/slideLayout1.xml".into())]),
        ));
        presentation_rels.push((format!("rId{}", n + 2), "slide", format!("slides/slide{}.xml", n)));
    }
    parts.push(("ppt/_rels/presentation.xml.rels".into(), relationships(&presentation_rels)));

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in &parts {
        zip.start_file::<_, ()>(name.as_str(), FileOptions::default())?;
        zip.write_all(content.as_bytes())?;
    }
    let cursor = zip.finish()?;
    tracing::debug!("Built PPTX deck with {} slides", count);
    Ok(cursor.into_inner())
}
