//! Code block extraction from model output
//!
//! The model is prompted to wrap executable code in fenced Markdown blocks:
//!
//! ````text
//! ```python
//! print("hello")
//! ```
//! ````
//!
//! Blocks without a language tag are treated as illustrative and skipped, as
//! are empty blocks and a fence left open at the end of the reply.

/// One extracted, language-tagged code fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Ordinal within one model turn, starting at 0
    pub index: usize,
    pub language: String,
    pub source: String,
}

/// Splits model output into executable code blocks
pub trait CodeExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<CodeBlock>;
}

/// Extracts ``` and ~~~ fenced blocks
#[derive(Debug, Clone, Default)]
pub struct MarkdownExtractor {
    /// Language assumed for untagged blocks; untagged blocks are skipped if None
    pub default_language: Option<String>,
}

struct OpenFence {
    marker: char,
    width: usize,
    language: Option<String>,
    lines: Vec<String>,
}

impl CodeExtractor for MarkdownExtractor {
    fn extract(&self, text: &str) -> Vec<CodeBlock> {
        let mut blocks = Vec::new();
        let mut open: Option<OpenFence> = None;

        for line in text.lines() {
            let trimmed = line.trim_start();
            match open.as_mut() {
                None => {
                    if let Some((marker, width, info)) = parse_fence(trimmed) {
                        open = Some(OpenFence {
                            marker,
                            width,
                            language: language_tag(info),
                            lines: Vec::new(),
                        });
                    }
                }
                Some(fence) => {
                    if is_closing_fence(trimmed, fence.marker, fence.width) {
                        if let Some(fence) = open.take() {
                            self.finish(fence, &mut blocks);
                        }
                    } else {
                        fence.lines.push(line.to_string());
                    }
                }
            }
        }

        blocks
    }
}

impl MarkdownExtractor {
    fn finish(&self, fence: OpenFence, blocks: &mut Vec<CodeBlock>) {
        let Some(language) = fence.language.or_else(|| self.default_language.clone()) else {
            return;
        };
        let source = fence.lines.join("\n");
        if source.trim().is_empty() {
            return;
        }
        blocks.push(CodeBlock {
            index: blocks.len(),
            language,
            source,
        });
    }
}

/// Opening fence: returns (marker char, fence width, info string)
fn parse_fence(line: &str) -> Option<(char, usize, &str)> {
    let marker = line.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let width = line.chars().take_while(|c| *c == marker).count();
    if width < 3 {
        return None;
    }
    let info = &line[width..];
    // A backtick fence's info string may not contain backticks
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some((marker, width, info.trim()))
}

fn is_closing_fence(line: &str, marker: char, width: usize) -> bool {
    let run = line.chars().take_while(|c| *c == marker).count();
    run >= width && line[run..].trim().is_empty()
}

fn language_tag(info: &str) -> Option<String> {
    let tag = info.split_whitespace().next()?;
    let tag = tag.trim_start_matches('{').trim_start_matches('.');
    if tag.is_empty() {
        return None;
    }
    Some(tag.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<CodeBlock> {
        MarkdownExtractor::default().extract(text)
    }

    #[test]
    fn test_extracts_blocks_in_order() {
        let text = "Plan:\n```python\nprint(1)\nprint(2)\n```\nthen\n```Bash\nls -l\n```\n";
        let blocks = extract(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].index, 0);
        assert_eq!(blocks[0].language, "python");
        assert_eq!(blocks[0].source, "print(1)\nprint(2)");
        assert_eq!(blocks[1].index, 1);
        assert_eq!(blocks[1].language, "bash");
        assert_eq!(blocks[1].source, "ls -l");
    }

    #[test]
    fn test_skips_untagged_empty_and_unterminated() {
        let text = "```\nsample output\n```\n```python\n\n```\n```sh\necho never closed";
        assert!(extract(text).is_empty());
    }

    #[test]
    fn test_default_language_for_untagged() {
        let extractor = MarkdownExtractor {
            default_language: Some("python".to_string()),
        };
        let blocks = extractor.extract("```\nx = 1\n```");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, "python");
    }

    #[test]
    fn test_nested_fence_and_tilde() {
        let text = "~~~~markdown\n```python\nnot code\n```\n~~~~\n";
        let blocks = extract(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, "markdown");
        assert_eq!(blocks[0].source, "```python\nnot code\n```");
    }

    #[test]
    fn test_no_blocks() {
        assert!(extract("All done, the file has 3 lines.").is_empty());
    }
}
