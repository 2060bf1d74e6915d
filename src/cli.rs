// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Terminal output helpers for the `tether` binary.

use crossterm::tty::IsTty;
use std::io::stdout;

use crate::lsp::SessionState;

/// Configuration for color output
#[derive(Debug, Clone, Copy)]
pub struct ColorConfig {
    /// Whether ANSI colors are written.
    pub enabled: bool,
}

impl ColorConfig {
    /// Create a new `ColorConfig`, auto-detecting TTY unless `nocolor` is true
    #[must_use]
    pub fn new(nocolor: bool) -> Self {
        Self {
            enabled: !nocolor && stdout().is_tty(),
        }
    }

    fn paint(self, code: u8, s: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    /// Green (ready, supported)
    #[must_use]
    pub fn green(self, s: &str) -> String {
        self.paint(32, s)
    }

    /// Yellow (transitional states)
    #[must_use]
    pub fn yellow(self, s: &str) -> String {
        self.paint(33, s)
    }

    /// Red (errors)
    #[must_use]
    pub fn red(self, s: &str) -> String {
        self.paint(31, s)
    }

    /// Cyan (service names)
    #[must_use]
    pub fn cyan(self, s: &str) -> String {
        self.paint(36, s)
    }

    /// Bold text
    #[must_use]
    pub fn bold(self, s: &str) -> String {
        self.paint(1, s)
    }

    /// Dim text
    #[must_use]
    pub fn dim(self, s: &str) -> String {
        self.paint(2, s)
    }

    /// A session state, colored by how usable it is.
    #[must_use]
    pub fn state(self, state: SessionState) -> String {
        match state {
            SessionState::Ready => self.green(state.as_str()),
            SessionState::Connecting | SessionState::AwaitingHandshake => {
                self.yellow(state.as_str())
            }
            SessionState::Disconnected | SessionState::Disposed => self.red(state.as_str()),
        }
    }
}

/// Get the terminal width, defaulting to 80 if unable to detect
#[must_use]
pub fn terminal_width() -> usize {
    crossterm::terminal::size().map_or(80, |(w, _)| usize::from(w))
}

/// Packs words into lines no wider than `width`, each prefixed by `indent`.
#[must_use]
pub fn wrap_words(words: &[&str], indent: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in words {
        if !line.is_empty() && indent.len() + line.len() + 1 + word.len() > width {
            lines.push(format!("{indent}{line}"));
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(format!("{indent}{line}"));
    }
    lines
}
