// ABOUTME: Converts the model's Markdown replies into Slack mrkdwn by walking pulldown-cmark events.
// ABOUTME: Code passes through untouched; headings, emphasis, strikes, links, lists and quotes are rewritten.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

/// Convert Markdown to Slack mrkdwn
pub fn markdown_to_mrkdwn(markdown: &str) -> String {
    let mut renderer = Renderer::default();
    for event in Parser::new_ext(markdown, Options::ENABLE_STRIKETHROUGH) {
        renderer.event(event);
    }
    renderer.finish()
}

#[derive(Default)]
struct Renderer {
    out: String,
    /// One entry per open list: next number, or None for bullets
    lists: Vec<Option<u64>>,
    quote_depth: usize,
    in_heading: bool,
    in_code_block: bool,
}

impl Renderer {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.out.push_str(&escape(&text)),
            Event::Code(code) => {
                self.out.push('`');
                self.out.push_str(&escape(&code));
                self.out.push('`');
            }
            Event::Html(html) | Event::InlineHtml(html) => self.out.push_str(&escape(&html)),
            Event::SoftBreak | Event::HardBreak => {
                self.out.push('\n');
                self.quote_prefix();
            }
            Event::Rule => {
                self.ensure_newlines(1);
                self.out.push_str("───");
                self.ensure_newlines(2);
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => self.quote_prefix(),
            Tag::Heading { .. } => {
                self.ensure_newlines(1);
                self.quote_prefix();
                self.in_heading = true;
                self.out.push('*');
            }
            Tag::BlockQuote { .. } => {
                self.ensure_newlines(1);
                self.quote_depth += 1;
            }
            Tag::CodeBlock { .. } => {
                // Slack ignores language hints, drop them
                self.ensure_newlines(1);
                self.in_code_block = true;
                self.out.push_str("```\n");
            }
            Tag::List(start) => {
                self.ensure_newlines(1);
                self.lists.push(start);
            }
            Tag::Item => self.start_item(),
            Tag::Emphasis => self.out.push('_'),
            // Headings are already bold
            Tag::Strong if !self.in_heading => self.out.push('*'),
            Tag::Strikethrough => self.out.push('~'),
            Tag::Link { dest_url, .. } | Tag::Image { dest_url, .. } => {
                self.out.push('<');
                self.out.push_str(&dest_url);
                self.out.push('|');
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                let gap = if self.lists.is_empty() { 2 } else { 1 };
                self.ensure_newlines(gap);
            }
            TagEnd::Heading { .. } => {
                self.out.push('*');
                self.in_heading = false;
                self.ensure_newlines(1);
            }
            TagEnd::BlockQuote { .. } => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.ensure_newlines(2);
            }
            TagEnd::CodeBlock { .. } => {
                self.ensure_newlines(1);
                self.out.push_str("```");
                self.in_code_block = false;
                self.ensure_newlines(1);
            }
            TagEnd::List { .. } => {
                self.lists.pop();
                let gap = if self.lists.is_empty() { 2 } else { 1 };
                self.ensure_newlines(gap);
            }
            TagEnd::Item => self.ensure_newlines(1),
            TagEnd::Emphasis => self.out.push('_'),
            TagEnd::Strong if !self.in_heading => self.out.push('*'),
            TagEnd::Strikethrough => self.out.push('~'),
            TagEnd::Link { .. } | TagEnd::Image { .. } => self.out.push('>'),
            _ => {}
        }
    }

    fn start_item(&mut self) {
        self.ensure_newlines(1);
        let depth = self.lists.len().saturating_sub(1);
        self.out.push_str(&"  ".repeat(depth));
        match self.lists.last_mut() {
            Some(Some(number)) => {
                self.out.push_str(&format!("{}. ", number));
                *number += 1;
            }
            _ => self.out.push_str("• "),
        }
    }

    fn quote_prefix(&mut self) {
        if self.quote_depth > 0 && !self.in_code_block {
            self.out.push_str("> ");
        }
    }

    /// Pad the output so it ends in at least `count` newlines
    fn ensure_newlines(&mut self, count: usize) {
        if self.out.is_empty() {
            return;
        }
        let present = self.out.chars().rev().take_while(|c| *c == '\n').count();
        for _ in present..count {
            self.out.push('\n');
        }
    }

    fn finish(self) -> String {
        self.out.trim_end_matches('\n').to_string()
    }
}

/// Slack treats these three as control characters in message text
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(markdown_to_mrkdwn("hello there"), "hello there");
        assert_eq!(markdown_to_mrkdwn(""), "");
    }

    #[test]
    fn test_bold_and_strike() {
        assert_eq!(markdown_to_mrkdwn("a **bold** move"), "a *bold* move");
        assert_eq!(markdown_to_mrkdwn("~~old~~ new"), "~old~ new");
    }

    #[test]
    fn test_single_asterisk_becomes_italic() {
        assert_eq!(markdown_to_mrkdwn("an *important* note"), "an _important_ note");
        assert_eq!(markdown_to_mrkdwn("_already_ fine"), "_already_ fine");
        assert_eq!(
            markdown_to_mrkdwn("***both***"),
            "_*both*_"
        );
    }

    #[test]
    fn test_headings_become_bold() {
        assert_eq!(markdown_to_mrkdwn("## Forecast"), "*Forecast*");
        assert_eq!(markdown_to_mrkdwn("# **Loud** title"), "*Loud title*");
        assert_eq!(markdown_to_mrkdwn("#hashtag"), "#hashtag");
    }

    #[test]
    fn test_links() {
        assert_eq!(
            markdown_to_mrkdwn("see [the docs](https://example.com/a?b=1)"),
            "see <https://example.com/a?b=1|the docs>"
        );
        assert_eq!(markdown_to_mrkdwn("[not a link] (x)"), "[not a link] (x)");
    }

    #[test]
    fn test_bullets() {
        assert_eq!(markdown_to_mrkdwn("- one\n  * two"), "• one\n  • two");
        assert_eq!(markdown_to_mrkdwn("1. first\n2. second"), "1. first\n2. second");
    }

    #[test]
    fn test_paragraphs_and_quotes() {
        assert_eq!(markdown_to_mrkdwn("first\n\nsecond"), "first\n\nsecond");
        assert_eq!(markdown_to_mrkdwn("> quoted\n> more"), "> quoted\n> more");
    }

    #[test]
    fn test_escapes_control_characters() {
        assert_eq!(markdown_to_mrkdwn("a < b & c > d"), "a &lt; b &amp; c &gt; d");
    }

    #[test]
    fn test_code_blocks_pass_through() {
        let input = "Before\n```rust\nlet x = **y**;\n```\nAfter **bold**";
        let output = markdown_to_mrkdwn(input);
        assert!(output.contains("```\nlet x = **y**;\n```"));
        assert!(output.ends_with("After *bold*"));
        assert!(!output.contains("rust"));
    }

    #[test]
    fn test_inline_code_untouched() {
        assert_eq!(markdown_to_mrkdwn("run `a **b**` now"), "run `a **b**` now");
    }

    #[test]
    fn test_unclosed_fence_is_code() {
        let output = markdown_to_mrkdwn("text\n```\nfn main() {}");
        assert_eq!(output, "text\n\n```\nfn main() {}\n```");
    }
}
