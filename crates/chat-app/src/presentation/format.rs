use pulldown_cmark::{Event as MarkdownEvent, Parser, Tag};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Indent applied to message bodies under their role header.
pub const BODY_INDENT: &str = "  ";

/// Formats message content for a plain terminal.
///
/// Each source line is formatted on its own, so formatting a prefix of complete lines never
/// changes when more content is appended. Live and committed content share this function.
pub fn format_content(content: &str, width: usize) -> Vec<String> {
    content
        .split('\n')
        .flat_map(|line| format_line(line, width))
        .collect()
}

/// Formats one source line, wrapping at `width` display columns (`0` disables wrapping).
pub fn format_line(line: &str, width: usize) -> Vec<String> {
    let line = line.trim_end();
    let body = line.trim_start();
    let indent = line.len() - body.len();

    let (marker, text) = plain_inline(body);
    let prefix = format!("{}{}", " ".repeat(indent), marker.unwrap_or_default());
    wrap_words(&prefix, &text, width)
}

/// Drops markdown syntax from a single line and returns its list marker, if any.
fn plain_inline(body: &str) -> (Option<String>, String) {
    let mut marker = None;
    let mut ordered_start = None;
    let mut text = String::new();

    for event in Parser::new(body) {
        match event {
            MarkdownEvent::Start(Tag::List(start)) => ordered_start = start,
            MarkdownEvent::Start(Tag::Item) => {
                marker = Some(match ordered_start {
                    Some(number) => format!("{number}. "),
                    None => "• ".to_string(),
                });
            }
            MarkdownEvent::Text(fragment)
            | MarkdownEvent::Code(fragment)
            | MarkdownEvent::Html(fragment) => text.push_str(&fragment),
            MarkdownEvent::SoftBreak | MarkdownEvent::HardBreak => text.push(' '),
            _ => {}
        }
    }

    (marker, text.trim().to_string())
}

fn wrap_words(prefix: &str, text: &str, width: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![prefix.trim_end().to_string()];
    }

    let prefix_width = UnicodeWidthStr::width(prefix);
    if width == 0 || prefix_width + UnicodeWidthStr::width(text) <= width {
        return vec![format!("{prefix}{text}")];
    }

    // At least one column of text per line, even when the prefix alone fills it.
    let text_width = width.saturating_sub(prefix_width).max(1);
    let continuation = " ".repeat(prefix_width);
    let mut lines = Vec::new();
    let mut current = prefix.to_string();
    let mut current_width = 0;
    let mut line_has_word = false;

    for word in text
        .split_whitespace()
        .flat_map(|word| split_wide_word(word, text_width))
    {
        let word_width = UnicodeWidthStr::width(word);
        let needed = if line_has_word { word_width + 1 } else { word_width };

        if line_has_word && current_width + needed > text_width {
            lines.push(std::mem::replace(&mut current, continuation.clone()));
            current_width = 0;
            line_has_word = false;
        }

        if line_has_word {
            current.push(' ');
            current_width += 1;
        }
        current.push_str(word);
        current_width += word_width;
        line_has_word = true;
    }

    lines.push(current);
    lines
}

/// Splits a word wider than `limit` columns at character boundaries.
fn split_wide_word(word: &str, limit: usize) -> Vec<&str> {
    if UnicodeWidthStr::width(word) <= limit {
        return vec![word];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    let mut piece_width = 0;
    for (offset, ch) in word.char_indices() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if piece_width > 0 && piece_width + ch_width > limit {
            pieces.push(&word[start..offset]);
            start = offset;
            piece_width = 0;
        }
        piece_width += ch_width;
    }
    pieces.push(&word[start..]);
    pieces
}
