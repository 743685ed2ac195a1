use crate::config::app_config::ProcessingConfig;
use crate::domain::model::{DataSource, Metadata, SourceType, TextChunk};
use crate::domain::ports::PendingChunk;
use chrono::Utc;
use serde_json::json;

/// Splits text into overlapping windows measured in chars.
#[derive(Debug, Clone)]
pub struct TextChunker {
    min_size: usize,
    max_size: usize,
    overlap: usize,
}

impl TextChunker {
    pub fn new(min_size: usize, max_size: usize, overlap: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            min_size: min_size.min(max_size),
            max_size,
            overlap: overlap.min(max_size.saturating_sub(1)),
        }
    }

    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self::new(config.min_chunk_size, config.max_chunk_size, config.overlap)
    }

    /// Last sentence end (or failing that, whitespace) in `chars[lo..hi]`.
    fn break_point(&self, chars: &[char], lo: usize, hi: usize) -> Option<usize> {
        let sentence_end = (lo..hi).rev().find(|&i| {
            matches!(chars[i], '.' | '!' | '?') && chars.get(i + 1).is_some_and(|c| c.is_whitespace())
        });
        if let Some(i) = sentence_end {
            return Some(i + 1);
        }
        (lo..hi).rev().find(|&i| chars[i].is_whitespace())
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.trim().chars().collect();
        let len = chars.len();
        if len == 0 {
            return Vec::new();
        }
        if len <= self.max_size {
            return vec![chars.iter().collect()];
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < len {
            let mut end = (start + self.max_size).min(len);
            if end < len {
                let lo = start + self.min_size;
                if let Some(at) = self.break_point(&chars, lo, end) {
                    end = at;
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }
            if end >= len {
                break;
            }

            let mut next = end.saturating_sub(self.overlap);
            if next <= start {
                next = end;
            }
            // start the overlap on a word
            if next < end {
                if let Some(ws) = (next..end).find(|&i| chars[i].is_whitespace()) {
                    next = ws + 1;
                }
            }
            start = next;
        }
        chunks
    }

    /// Chunks a source's raw content. `source_id` stays 0 until the source is stored.
    pub fn chunk_source(&self, source_index: usize, source: &DataSource) -> Vec<PendingChunk> {
        let Some(content) = source.raw_content.as_deref() else {
            return Vec::new();
        };
        let pieces = self.chunk(content);
        let total = pieces.len();

        pieces
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let mut metadata = Metadata::new();
                metadata.insert("chunk_index".into(), json!(i));
                metadata.insert("total_chunks".into(), json!(total));
                metadata.insert("char_count".into(), json!(text.chars().count()));
                PendingChunk {
                    source_index,
                    chunk: TextChunk {
                        id: None,
                        source_id: 0,
                        text,
                        chunk_type: chunk_type_for(source.source_type).to_string(),
                        metadata,
                        created_at: Utc::now(),
                    },
                }
            })
            .collect()
    }
}

pub fn chunk_type_for(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::SecFiling => "filing",
        SourceType::NewsArticle | SourceType::RssFeed => "news",
        SourceType::MarketData => "market",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence number {} talks about revenue growth in services.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunker = TextChunker::new(100, 2000, 200);
        assert_eq!(chunker.chunk("  Apple grew.  "), vec!["Apple grew."]);
        assert!(chunker.chunk("   ").is_empty());
    }

    #[test]
    fn test_long_text_respects_bounds_and_overlaps() {
        let chunker = TextChunker::new(100, 300, 50);
        let text = sentence_text(40);
        let chunks = chunker.chunk(&text);

        assert!(chunks.len() > 5);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 300);
        }
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.chars().count() >= 100);
            assert!(chunk.ends_with('.'), "expected sentence break: {:?}", chunk);
        }
        // consecutive chunks share text
        let tail: String = chunks[0].chars().rev().take(20).collect::<Vec<_>>().into_iter().rev().collect();
        assert!(chunks[1].contains(tail.trim()));
    }

    #[test]
    fn test_multibyte_text_is_safe() {
        let chunker = TextChunker::new(10, 40, 5);
        let text = "營收成長 ".repeat(50);
        let chunks = chunker.chunk(&text);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
    }

    #[test]
    fn test_unbroken_text_still_progresses() {
        let chunker = TextChunker::new(10, 50, 10);
        let text = "x".repeat(500);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() >= 10);
        assert!(chunks.iter().all(|c| c.len() <= 50));
    }

    #[test]
    fn test_chunk_source_sets_type_and_index() {
        let chunker = TextChunker::new(100, 300, 50);
        let mut source = DataSource::new(1, SourceType::SecFiling);
        source.raw_content = Some(sentence_text(20));

        let chunks = chunker.chunk_source(4, &source);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.source_index == 4 && c.chunk.chunk_type == "filing"));
        assert_eq!(chunks[0].chunk.metadata["total_chunks"], json!(chunks.len()));

        let empty = DataSource::new(1, SourceType::NewsArticle);
        assert!(chunker.chunk_source(0, &empty).is_empty());
    }
}
