//! CommonMark to Slack block conversion for outbound messages.
//!
//! Slack's `mrkdwn` dialect differs from CommonMark: bold is `*text*`,
//! italic `_text_`, links `<url|text>`. Headings become `header` blocks,
//! thematic breaks become dividers, everything else renders to `section`
//! blocks. Callers fall back to plain text when conversion yields nothing.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Slack rejects messages with more than 50 blocks.
const MAX_BLOCKS: usize = 50;
/// A section's text object caps out at 3000 characters.
const MAX_SECTION_LEN: usize = 3000;

/// Convert a CommonMark payload into Slack blocks.
///
/// Errors are recoverable by design: the add-message handler posts the raw
/// text instead when this fails.
pub fn markdown_to_blocks(markdown: &str) -> Result<Value> {
    let parser = Parser::new_ext(markdown, Options::all());

    let mut blocks: Vec<Value> = Vec::new();
    let mut section = String::new();
    let mut heading: Option<String> = None;
    let mut list_depth: usize = 0;

    let mut flush_section = |section: &mut String, blocks: &mut Vec<Value>| {
        let text = section.trim_end().to_string();
        section.clear();
        if text.is_empty() {
            return;
        }
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": text },
        }));
    };

    for event in parser {
        match event {
            Event::Start(tag) => match tag {
                Tag::Heading { .. } => {
                    flush_section(&mut section, &mut blocks);
                    heading = Some(String::new());
                }
                Tag::Strong => section.push('*'),
                Tag::Emphasis => section.push('_'),
                Tag::Strikethrough => section.push('~'),
                Tag::CodeBlock(_) => section.push_str("```\n"),
                Tag::Link { dest_url, .. } => {
                    section.push('<');
                    section.push_str(&dest_url);
                    section.push('|');
                }
                Tag::List(_) => list_depth += 1,
                Tag::Item => {
                    for _ in 1..list_depth {
                        section.push_str("    ");
                    }
                    section.push_str("- ");
                }
                Tag::BlockQuote(_) => section.push_str("> "),
                Tag::Paragraph => {}
                _ => {}
            },
            Event::End(tag_end) => match tag_end {
                TagEnd::Heading(_) => {
                    let text = heading.take().unwrap_or_default();
                    if !text.is_empty() {
                        blocks.push(json!({
                            "type": "header",
                            "text": { "type": "plain_text", "text": text, "emoji": true },
                        }));
                    }
                }
                TagEnd::Strong => section.push('*'),
                TagEnd::Emphasis => section.push('_'),
                TagEnd::Strikethrough => section.push('~'),
                TagEnd::CodeBlock => section.push_str("```\n"),
                TagEnd::Link => section.push('>'),
                TagEnd::Paragraph => {
                    section.push('\n');
                    flush_section(&mut section, &mut blocks);
                }
                TagEnd::List(_) => {
                    list_depth = list_depth.saturating_sub(1);
                    if list_depth == 0 {
                        flush_section(&mut section, &mut blocks);
                    }
                }
                TagEnd::Item => section.push('\n'),
                TagEnd::BlockQuote(_) => flush_section(&mut section, &mut blocks),
                _ => {}
            },
            Event::Text(text) => match &mut heading {
                Some(h) => h.push_str(&text),
                None => section.push_str(&text),
            },
            Event::Code(code) => {
                let target = match &mut heading {
                    Some(h) => h,
                    None => &mut section,
                };
                target.push('`');
                target.push_str(&code);
                target.push('`');
            }
            Event::SoftBreak | Event::HardBreak => section.push('\n'),
            Event::Rule => {
                flush_section(&mut section, &mut blocks);
                blocks.push(json!({ "type": "divider" }));
            }
            _ => {}
        }
    }
    flush_section(&mut section, &mut blocks);

    if blocks.is_empty() {
        return Err(Error::BadRequest("markdown produced no renderable blocks".into()));
    }
    if blocks.len() > MAX_BLOCKS {
        return Err(Error::BadRequest(format!(
            "markdown produced {} blocks, Slack allows {MAX_BLOCKS}",
            blocks.len()
        )));
    }
    for block in &blocks {
        if let Some(text) = block.pointer("/text/text").and_then(Value::as_str) {
            if text.len() > MAX_SECTION_LEN {
                return Err(Error::BadRequest("markdown section exceeds 3000 characters".into()));
            }
        }
    }

    Ok(Value::Array(blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(md: &str) -> Vec<Value> {
        markdown_to_blocks(md).unwrap().as_array().unwrap().clone()
    }

    #[test]
    fn bold_and_italic_render_as_mrkdwn() {
        let out = blocks("**bold** and *italic* and `code`");
        assert_eq!(out.len(), 1);
        let text = out[0].pointer("/text/text").unwrap().as_str().unwrap();
        assert!(text.contains("*bold*"));
        assert!(text.contains("_italic_"));
        assert!(text.contains("`code`"));
    }

    #[test]
    fn links_use_slack_form() {
        let out = blocks("[docs](https://example.com)");
        let text = out[0].pointer("/text/text").unwrap().as_str().unwrap();
        assert_eq!(text, "<https://example.com|docs>");
    }

    #[test]
    fn heading_becomes_header_block() {
        let out = blocks("# Release notes\n\nbody text");
        assert_eq!(out[0]["type"], "header");
        assert_eq!(out[0].pointer("/text/text").unwrap(), "Release notes");
        assert_eq!(out[1]["type"], "section");
    }

    #[test]
    fn rule_becomes_divider() {
        let out = blocks("above\n\n---\n\nbelow");
        assert_eq!(out[1]["type"], "divider");
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn list_items_render_with_dashes() {
        let out = blocks("- one\n- two");
        let text = out[0].pointer("/text/text").unwrap().as_str().unwrap();
        assert_eq!(text, "- one\n- two");
    }

    #[test]
    fn code_block_is_fenced() {
        let out = blocks("```\nlet x = 1;\n```");
        let text = out[0].pointer("/text/text").unwrap().as_str().unwrap();
        assert!(text.starts_with("```"));
        assert!(text.contains("let x = 1;"));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(markdown_to_blocks("").is_err());
        assert!(markdown_to_blocks("   \n").is_err());
    }

    #[test]
    fn strikethrough_renders() {
        let out = blocks("~~gone~~");
        let text = out[0].pointer("/text/text").unwrap().as_str().unwrap();
        assert_eq!(text, "~gone~");
    }
}
