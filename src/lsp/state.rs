// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Session lifecycle state and progress tracking types.

use lsp_types::{NumberOrString, ProgressParams, ProgressParamsValue, WorkDoneProgress};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Token type for progress tracking (string or number).
pub type ProgressToken = NumberOrString;

/// State of an active progress operation.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// The title of the progress operation.
    pub title: String,
    /// The optional progress message.
    pub message: Option<String>,
    /// The optional progress percentage (0-100).
    pub percentage: Option<u32>,
    /// When the operation started.
    pub started: Instant,
}

/// Lifecycle state of a language client session.
///
/// `Disconnected -> Connecting -> AwaitingHandshake -> Ready -> Disconnected`,
/// with `Disposed` terminal and reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection and none being attempted.
    Disconnected,
    /// The transport is connecting or waiting to retry.
    Connecting,
    /// Connected, `initialize` sent, no answer yet.
    AwaitingHandshake,
    /// Handshake complete; requests may be sent.
    Ready,
    /// The session was disposed.
    Disposed,
}

impl SessionState {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHandshake => "awaiting_handshake",
            Self::Ready => "ready",
            Self::Disposed => "disposed",
        }
    }

    /// Returns true once the session can never become ready again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disposed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manages progress state for a single session.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    active_progress: HashMap<ProgressToken, ProgressState>,
}

impl ProgressTracker {
    /// Creates a new `ProgressTracker`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update state from a progress notification.
    pub fn update(&mut self, params: &ProgressParams) {
        let ProgressParamsValue::WorkDone(progress) = &params.value;
        match progress {
            WorkDoneProgress::Begin(begin) => {
                self.active_progress.insert(
                    params.token.clone(),
                    ProgressState {
                        title: begin.title.clone(),
                        message: begin.message.clone(),
                        percentage: begin.percentage,
                        started: Instant::now(),
                    },
                );
            }
            WorkDoneProgress::Report(report) => {
                if let Some(state) = self.active_progress.get_mut(&params.token) {
                    if report.message.is_some() {
                        state.message.clone_from(&report.message);
                    }
                    if report.percentage.is_some() {
                        state.percentage = report.percentage;
                    }
                }
            }
            WorkDoneProgress::End(_) => {
                self.active_progress.remove(&params.token);
            }
        }
    }

    /// Returns true if the server has any progress operations in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.active_progress.is_empty()
    }

    /// Returns the least advanced active progress.
    #[must_use]
    pub fn primary_progress(&self) -> Option<&ProgressState> {
        self.active_progress
            .values()
            .min_by_key(|p| p.percentage.unwrap_or(0))
    }

    /// Clear all progress. Tokens do not survive a connection.
    pub fn clear(&mut self) {
        self.active_progress.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use lsp_types::{WorkDoneProgressBegin, WorkDoneProgressEnd, WorkDoneProgressReport};

    fn progress(token: &str, progress: WorkDoneProgress) -> ProgressParams {
        ProgressParams {
            token: NumberOrString::String(token.to_string()),
            value: ProgressParamsValue::WorkDone(progress),
        }
    }

    fn begin(title: &str, percentage: Option<u32>) -> WorkDoneProgress {
        WorkDoneProgress::Begin(WorkDoneProgressBegin {
            title: title.to_string(),
            cancellable: None,
            message: None,
            percentage,
        })
    }

    #[test]
    fn test_progress_begin_report_end() -> Result<()> {
        let mut tracker = ProgressTracker::new();
        assert!(!tracker.is_busy());

        tracker.update(&progress("load", begin("Loading", Some(0))));
        assert!(tracker.is_busy());

        tracker.update(&progress(
            "load",
            WorkDoneProgress::Report(WorkDoneProgressReport {
                cancellable: None,
                message: Some("half".to_string()),
                percentage: Some(50),
            }),
        ));
        let primary = tracker.primary_progress().context("missing progress")?;
        assert_eq!(primary.title, "Loading");
        assert_eq!(primary.percentage, Some(50));
        assert_eq!(primary.message.as_deref(), Some("half"));

        tracker.update(&progress(
            "load",
            WorkDoneProgress::End(WorkDoneProgressEnd { message: None }),
        ));
        assert!(!tracker.is_busy());
        Ok(())
    }

    #[test]
    fn test_report_for_unknown_token_is_ignored() {
        let mut tracker = ProgressTracker::new();
        tracker.update(&progress(
            "ghost",
            WorkDoneProgress::Report(WorkDoneProgressReport {
                cancellable: None,
                message: Some("?".to_string()),
                percentage: Some(10),
            }),
        ));
        assert!(!tracker.is_busy());
    }

    #[test]
    fn test_primary_is_least_advanced_and_clear() -> Result<()> {
        let mut tracker = ProgressTracker::new();
        tracker.update(&progress("a", begin("Indexing", Some(50))));
        tracker.update(&progress("b", begin("Analyzing", Some(10))));

        let primary = tracker.primary_progress().context("missing progress")?;
        assert_eq!(primary.title, "Analyzing");

        tracker.clear();
        assert!(!tracker.is_busy());
        assert!(tracker.primary_progress().is_none());
        Ok(())
    }

    #[test]
    fn test_session_state_names() -> Result<()> {
        assert_eq!(SessionState::AwaitingHandshake.to_string(), "awaiting_handshake");
        assert_eq!(
            serde_json::to_value(SessionState::Ready)?,
            serde_json::json!("ready")
        );
        assert!(SessionState::Disposed.is_terminal());
        assert!(!SessionState::Disconnected.is_terminal());
        Ok(())
    }
}
