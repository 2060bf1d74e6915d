// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Applying LSP content changes to plain text.
//!
//! Positions use UTF-16 code units for `character`, the LSP default.

use lsp_types::{Position, TextDocumentContentChangeEvent};

/// Converts an LSP position into a byte offset into `text`.
///
/// A `character` past the end of its line clamps to the line end (before
/// any `\r\n`), and a `line` past the last line clamps to the end of the
/// text. A position inside a surrogate pair rounds up to the next character.
#[must_use]
pub fn offset_at(text: &str, position: Position) -> usize {
    let mut line_start = 0;
    for _ in 0..position.line {
        match text[line_start..].find('\n') {
            Some(i) => line_start += i + 1,
            None => return text.len(),
        }
    }

    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |i| line_start + i);
    let line = &text[line_start..line_end];
    let line = line.strip_suffix('\r').unwrap_or(line);

    let mut units = 0u32;
    for (idx, ch) in line.char_indices() {
        if units >= position.character {
            return line_start + idx;
        }
        units += u32::try_from(ch.len_utf16()).unwrap_or(2);
    }
    line_start + line.len()
}

/// Applies one change event in place.
///
/// A change without a range replaces the whole text. A reversed range is
/// treated as if its ends were swapped.
pub fn apply_change(text: &mut String, change: &TextDocumentContentChangeEvent) {
    let Some(range) = change.range else {
        text.clone_from(&change.text);
        return;
    };

    let mut start = offset_at(text, range.start);
    let mut end = offset_at(text, range.end);
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    text.replace_range(start..end, &change.text);
}

/// Applies changes in order, returning the resulting text.
#[must_use]
pub fn apply_changes(text: &str, changes: &[TextDocumentContentChangeEvent]) -> String {
    let mut text = text.to_string();
    for change in changes {
        apply_change(&mut text, change);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Range;

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    fn edit(start: Position, end: Position, text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: Some(Range { start, end }),
            range_length: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_offsets_across_lines() {
        let text = "ab\ncd\n";
        assert_eq!(offset_at(text, pos(0, 0)), 0);
        assert_eq!(offset_at(text, pos(0, 2)), 2);
        assert_eq!(offset_at(text, pos(1, 1)), 4);
        assert_eq!(offset_at(text, pos(2, 0)), 6);
    }

    #[test]
    fn test_offsets_clamp() {
        let text = "ab\r\ncd";
        // Past the line end stops before the CRLF
        assert_eq!(offset_at(text, pos(0, 99)), 2);
        assert_eq!(offset_at(text, pos(1, 99)), 6);
        assert_eq!(offset_at(text, pos(42, 0)), 6);
    }

    #[test]
    fn test_offsets_count_utf16_units() {
        // 'é' is one UTF-16 unit (two bytes), '😀' is two units (four bytes)
        let text = "é😀x";
        assert_eq!(offset_at(text, pos(0, 1)), 2);
        assert_eq!(offset_at(text, pos(0, 3)), 6);
        // Inside the surrogate pair rounds up
        assert_eq!(offset_at(text, pos(0, 2)), 6);
    }

    #[test]
    fn test_apply_ranged_edits_in_sequence() {
        let changes = [
            edit(pos(0, 1), pos(0, 1), "y"),
            edit(pos(0, 0), pos(0, 1), "X"),
            edit(pos(0, 2), pos(0, 2), "\nz"),
        ];
        assert_eq!(apply_changes("x", &changes[..1]), "xy");
        assert_eq!(apply_changes("x", &changes), "Xy\nz");
    }

    #[test]
    fn test_full_text_change_replaces_everything() {
        let changes = [
            edit(pos(0, 0), pos(0, 0), "lost "),
            TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "fresh".to_string(),
            },
            edit(pos(0, 5), pos(0, 5), "!"),
        ];
        assert_eq!(apply_changes("old", &changes), "fresh!");
    }

    #[test]
    fn test_reversed_range_is_normalized() {
        let mut text = "hello world".to_string();
        apply_change(&mut text, &edit(pos(0, 11), pos(0, 5), ""));
        assert_eq!(text, "hello");
    }
}
