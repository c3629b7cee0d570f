use pulldown_cmark::{Event, Parser as CmarkParser, Tag, TagEnd};

use super::{decode_utf8, Extractor};
use crate::error::Result;

/// Markdown extractor: headings, paragraphs, list items, table rows and code blocks each become a block
pub struct MarkdownExtractor;

fn flush(current: &mut String, blocks: &mut Vec<String>) {
    let block = current.trim();
    if !block.is_empty() {
        blocks.push(block.to_string());
    }
    current.clear();
}

impl Extractor for MarkdownExtractor {
    fn can_extract(&self, extension: &str) -> bool {
        extension == "md" || extension == "markdown"
    }

    fn extract(&self, bytes: &[u8], name: &str) -> Result<Vec<String>> {
        let content = decode_utf8(bytes, name)?;
        let mut blocks = Vec::new();
        let mut current = String::new();
        let mut in_code = false;

        for event in CmarkParser::new(content) {
            match event {
                Event::Start(Tag::Heading { .. } | Tag::Paragraph | Tag::Item) => {
                    flush(&mut current, &mut blocks);
                }
                Event::Start(Tag::CodeBlock(_)) => {
                    flush(&mut current, &mut blocks);
                    in_code = true;
                }
                Event::End(TagEnd::CodeBlock) => {
                    flush(&mut current, &mut blocks);
                    in_code = false;
                }
                Event::End(TagEnd::Heading(_) | TagEnd::Paragraph | TagEnd::Item | TagEnd::TableRow) => {
                    flush(&mut current, &mut blocks);
                }
                Event::End(TagEnd::TableCell) => current.push_str(" | "),
                Event::Text(text) => current.push_str(&text),
                Event::Code(code) => {
                    current.push('`');
                    current.push_str(&code);
                    current.push('`');
                }
                Event::SoftBreak => current.push(if in_code { '\n' } else { ' ' }),
                Event::HardBreak => current.push('\n'),
                _ => {}
            }
        }
        flush(&mut current, &mut blocks);

        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_extractor_can_extract() {
        assert!(MarkdownExtractor.can_extract("md"));
        assert!(!MarkdownExtractor.can_extract("txt"));
    }

    #[test]
    fn test_markdown_blocks_in_order() {
        let content = r#"
# Title

This is content
over two lines.

- first item
- second with `code`

```rust
fn main() {}
```
"#;
        let blocks = MarkdownExtractor.extract(content.as_bytes(), "doc.md").unwrap();
        assert_eq!(
            blocks,
            vec![
                "Title",
                "This is content over two lines.",
                "first item",
                "second with `code`",
                "fn main() {}",
            ]
        );
    }
}
