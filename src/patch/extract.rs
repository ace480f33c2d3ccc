//! Structured patch extraction from free-form model output.
//!
//! Precedence:
//!
//! 1. Fenced code blocks (```` ``` ```` with an optional language tag, on one
//!    line or several), scanned from the end of the text backward. The first
//!    block that parses as a JSON object wins, so a final corrected answer
//!    overrides earlier drafts.
//! 2. The whole trimmed text, parsed as a JSON object.
//!
//! Anything else is a [`EvolverError::PatchParse`]. Only objects count: a
//! fenced array or scalar is skipped like a malformed block.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{EvolverError, Result};

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[ \t]*[\w+-]*[ \t]*\r?\n?(.*?)```").expect("Invalid fenced block regex")
});

/// Where the accepted patch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchSource {
    /// Index of the fenced block, counting from the start of the text
    FencedBlock(usize),
    WholeText,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPatch {
    pub patch: Map<String, Value>,
    pub source: PatchSource,
}

/// Raw contents of every fenced block, in text order.
pub fn fenced_blocks(text: &str) -> Vec<&str> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

fn parse_object(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Extract the patch object from an external response.
pub fn extract_patch(text: &str) -> Result<ExtractedPatch> {
    let blocks = fenced_blocks(text);

    for (index, block) in blocks.iter().enumerate().rev() {
        if let Some(patch) = parse_object(block) {
            return Ok(ExtractedPatch {
                patch,
                source: PatchSource::FencedBlock(index),
            });
        }
    }

    if let Some(patch) = parse_object(text) {
        return Ok(ExtractedPatch {
            patch,
            source: PatchSource::WholeText,
        });
    }

    let preview: String = text.trim().chars().take(120).collect();
    Err(EvolverError::PatchParse(if blocks.is_empty() {
        format!("no fenced block and the text is not a JSON object: {:?}", preview)
    } else {
        format!("{} fenced block(s), none a JSON object: {:?}", blocks.len(), preview)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_block_wins() {
        let text = "Draft:\n```json\n{\"a\": 1}\n```\nActually, better:\n```json\n{\"a\": 2}\n```\n";
        let extracted = extract_patch(text).unwrap();
        assert_eq!(extracted.patch["a"], json!(2));
        assert_eq!(extracted.source, PatchSource::FencedBlock(1));
    }

    #[test]
    fn test_malformed_last_block_falls_back_to_earlier() {
        let text = "```json\n{\"a\": 1}\n```\nand then\n```json\n{\"a\": 2,,}\n```";
        let extracted = extract_patch(text).unwrap();
        assert_eq!(extracted.patch["a"], json!(1));
        assert_eq!(extracted.source, PatchSource::FencedBlock(0));
    }

    #[test]
    fn test_untagged_fence_and_non_object_blocks() {
        let text = "```\n{\"river_count\": 3}\n```\n```json\n[1, 2, 3]\n```";
        let extracted = extract_patch(text).unwrap();
        assert_eq!(extracted.patch["river_count"], json!(3));
    }

    #[test]
    fn test_single_line_fence() {
        let extracted = extract_patch("Use ```{\"a\": 2}``` for now.").unwrap();
        assert_eq!(extracted.patch["a"], json!(2));
        assert_eq!(extracted.source, PatchSource::FencedBlock(0));

        let tagged = extract_patch("```json {\"a\": 3}```").unwrap();
        assert_eq!(tagged.patch["a"], json!(3));
    }

    #[test]
    fn test_whole_text_fallback() {
        let extracted = extract_patch("  {\"pond_count\": 1}\n").unwrap();
        assert_eq!(extracted.patch["pond_count"], json!(1));
        assert_eq!(extracted.source, PatchSource::WholeText);
    }

    #[test]
    fn test_whole_text_fallback_when_blocks_are_bad() {
        let text = "{\"a\": 3}";
        assert_eq!(extract_patch(text).unwrap().patch["a"], json!(3));

        let text = "```python\nprint('hi')\n```";
        assert!(matches!(extract_patch(text), Err(EvolverError::PatchParse(_))));
    }

    #[test]
    fn test_prose_is_rejected() {
        let err = extract_patch("I think we should raise tree density a bit.").unwrap_err();
        assert!(matches!(err, EvolverError::PatchParse(_)));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let text = "Reasoning...\n```json\n{\"farm_zone\": {\"w\": 30}, \"tree_frequency\": 0.2}\n```";
        let first = extract_patch(text).unwrap();
        let reparsed_text = serde_json::to_string(&Value::Object(first.patch.clone())).unwrap();
        let second = extract_patch(&reparsed_text).unwrap();
        assert_eq!(first.patch, second.patch);
    }
}
