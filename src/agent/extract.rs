//! Reduce raw model output to a single code artifact.
//!
//! Models wrap answers in reasoning blocks, Markdown fences, or prose.
//! Extraction runs a fixed priority ladder: drop everything through the last
//! closing think tag, take the last well-formed fenced block, fall back to
//! looser fence handling, and finally accept bare text when it carries
//! structural code indicators. Nothing here understands the code itself.

use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

static THINK_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</think(?:ing)?>").expect("valid regex"));
static THINK_SELF_CLOSING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<think(?:ing)?\s*/>").expect("valid regex"));
static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[\w-]*[ \t]*\n([\s\S]*?)\n[ \t]*```").expect("valid regex"));
static LOOSE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[\w-]*\s*([\s\S]+?)\s*```").expect("valid regex"));
static LANGUAGE_TAG_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w-]+\s*\n").expect("valid regex"));
static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[\w-]*\s*\n?").expect("valid regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n?\s*```\s*$").expect("valid regex"));

/// Structural hints that bare text is source code: declarations, comment
/// markers, shebangs.
static CODE_INDICATORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?m)^package\s+\w+",
        r"(?m)^import\s+",
        r"(?m)^#include\s*<",
        r"(?m)^def\s+\w+\s*\(",
        r"(?m)^class\s+\w+",
        r"(?m)^public\s+(class|interface)",
        r"(?m)^function\s+\w+",
        r"(?m)^\s*//",
        r"(?m)^\s*/\*",
        r"(?m)^#!/",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Outcome of artifact extraction. `likely_parse_failure` flags text that
/// matched no fence and no code indicator; the text is still returned.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub code: String,
    pub likely_parse_failure: bool,
}

/// Run the extraction ladder over raw model text.
pub fn extract_code(raw: &str) -> Extracted {
    let mut text = raw.trim().to_string();
    if text.is_empty() {
        return Extracted {
            code: text,
            likely_parse_failure: true,
        };
    }

    // Reasoning block: everything through the LAST closing tag goes.
    if let Some(last) = THINK_CLOSE.find_iter(&text).last() {
        text = text[last.end()..].trim().to_string();
    }
    text = THINK_SELF_CLOSING.replace_all(&text, "").trim().to_string();

    // Well-formed fenced blocks: the last one is the final answer.
    let blocks: Vec<&str> = FENCED_BLOCK
        .captures_iter(&text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect();
    if let Some(last) = blocks.last() {
        return Extracted {
            code: (*last).to_string(),
            likely_parse_failure: false,
        };
    }

    // Looser match: a single ``` ... ``` span without the newline discipline.
    if let Some(caps) = LOOSE_BLOCK.captures(&text)
        && let Some(m) = caps.get(1)
    {
        let mut code = m.as_str().trim().to_string();
        if LANGUAGE_TAG_LINE.is_match(&code) {
            code = LANGUAGE_TAG_LINE.replace(&code, "").trim().to_string();
        }
        if !code.is_empty() {
            return Extracted {
                code,
                likely_parse_failure: false,
            };
        }
    }

    // Whole payload wrapped in fences but malformed: strip them.
    if text.starts_with("```") {
        let stripped = LEADING_FENCE.replace(&text, "");
        let stripped = TRAILING_FENCE.replace(&stripped, "");
        let stripped = stripped.trim();
        if !stripped.is_empty() {
            return Extracted {
                code: stripped.to_string(),
                likely_parse_failure: false,
            };
        }
    }

    let looks_like_code = CODE_INDICATORS.iter().any(|p| p.is_match(&text));
    if !looks_like_code {
        let preview: String = text.chars().take(200).collect();
        warn!("no code fence found and content does not look like code (starts: {preview:?})");
    }
    Extracted {
        code: text,
        likely_parse_failure: !looks_like_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_fenced_block() {
        let raw = "Here you go:\n```java\npublic class A {}\n```\nDone.";
        let extracted = extract_code(raw);
        assert_eq!(extracted.code, "public class A {}");
        assert!(!extracted.likely_parse_failure);
    }

    #[test]
    fn test_last_of_multiple_blocks_wins() {
        let raw = "First try:\n```\nint a = 1;\n```\nActually:\n```\nint a = 2;\n```";
        assert_eq!(extract_code(raw).code, "int a = 2;");
    }

    #[test]
    fn test_think_block_stripped_before_extraction() {
        let raw = "<think>\nThe answer inside here has ```\nfake\n``` fences.\n</think>\n```python\nprint(1)\n```";
        assert_eq!(extract_code(raw).code, "print(1)");
    }

    #[test]
    fn test_last_closing_think_tag_wins() {
        let raw = "<think>a</think>middle<think>b</think>\npackage main;\n";
        let extracted = extract_code(raw);
        assert_eq!(extracted.code, "package main;");
        assert!(!extracted.likely_parse_failure);
    }

    #[test]
    fn test_thinking_variant_and_self_closing() {
        let raw = "</thinking>\n<think/>\n```c\n#include <stdio.h>\n```";
        assert_eq!(extract_code(raw).code, "#include <stdio.h>");
    }

    #[test]
    fn test_loose_fences_without_newlines() {
        let raw = "```java\nint x = 0;```";
        assert_eq!(extract_code(raw).code, "int x = 0;");
    }

    #[test]
    fn test_unterminated_leading_fence_stripped() {
        let raw = "```python\nprint('hi')\nprint('bye')";
        let extracted = extract_code(raw);
        assert_eq!(extracted.code, "print('hi')\nprint('bye')");
        assert!(!extracted.likely_parse_failure);
    }

    #[test]
    fn test_bare_code_with_indicators_passes_through() {
        let raw = "package com.example;\n\npublic class Main {}\n";
        let extracted = extract_code(raw);
        assert_eq!(extracted.code, raw.trim());
        assert!(!extracted.likely_parse_failure);
    }

    #[test]
    fn test_comment_marker_counts_as_indicator() {
        let raw = "// fill in below\nx = compute()";
        assert!(!extract_code(raw).likely_parse_failure);
    }

    #[test]
    fn test_prose_flagged_but_still_returned() {
        let raw = "I am sorry, I cannot complete this exercise.";
        let extracted = extract_code(raw);
        assert_eq!(extracted.code, raw);
        assert!(extracted.likely_parse_failure);
    }

    #[test]
    fn test_empty_input_flagged() {
        assert!(extract_code("   ").likely_parse_failure);
    }
}
