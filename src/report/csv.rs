use crate::domain::model::DataSource;
use crate::utils::error::{AnalystError, Result};

const HEADERS: [&str; 8] = [
    "id",
    "type",
    "title",
    "url",
    "published_at",
    "checksum",
    "content_length",
    "ticker",
];

/// One row per source; content itself is left out.
pub fn render_sources(sources: &[DataSource]) -> Result<Vec<u8>> {
    let mut writer = ::csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADERS)?;

    for (i, source) in sources.iter().enumerate() {
        let id = source.id.unwrap_or(i as i64 + 1).to_string();
        let published = source
            .published_at
            .map(|d| d.to_rfc3339())
            .unwrap_or_default();
        let length = source
            .raw_content
            .as_ref()
            .map(|c| c.chars().count())
            .unwrap_or(0)
            .to_string();
        writer.write_record([
            id.as_str(),
            source.source_type.as_str(),
            source.title.as_deref().unwrap_or(""),
            source.url.as_deref().unwrap_or(""),
            published.as_str(),
            source.checksum.as_deref().unwrap_or(""),
            length.as_str(),
            source.metadata_str("ticker").unwrap_or(""),
        ])?;
    }

    writer.into_inner().map_err(|e| AnalystError::ExportError {
        message: format!("CSV buffer: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures;

    #[test]
    fn test_render_sources_quotes_fields() {
        let bytes = render_sources(&fixtures::sources(1)).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "id,type,title,url,published_at,checksum,content_length,ticker");
        assert_eq!(lines[1], "1,market_data,AAPL Historical Data (1y),market://AAPL/history,,,21,");
        assert_eq!(
            lines[2],
            r#"2,news_article,"Apple, ""iPhone"" sales rise",https://news.example.com/apple,2024-09-09T08:00:00+00:00,,35,"#
        );
    }

    #[test]
    fn test_empty_sources_has_header_only() {
        let text = String::from_utf8(render_sources(&[]).unwrap()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
