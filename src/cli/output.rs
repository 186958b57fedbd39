//! Colored output helpers for CLI
//!
//! Consistent, colored terminal output for the `deepcite run` progress feed.

use crate::research::{EventKind, PartialResult, ProgressEvent, RunOutcome};
use owo_colors::OwoColorize;
use std::fmt::Display;

/// Where non-error lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
    pub stream: Stream,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self {
            colored: true,
            stream: Stream::Stdout,
        }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self {
            colored: false,
            stream: Stream::Stdout,
        }
    }

    /// Send every line to stderr, leaving stdout to machine-readable output
    pub fn on_stderr(mut self) -> Self {
        self.stream = Stream::Stderr;
        self
    }

    fn line(&self, text: impl Display) {
        match self.stream {
            Stream::Stdout => println!("{text}"),
            Stream::Stderr => eprintln!("{text}"),
        }
    }

    /// Print the startup banner
    pub fn banner(&self) {
        if self.colored {
            self.line(format!(
                "\n   {} {}\n",
                "DeepCite".bright_cyan().bold(),
                format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
            ));
        } else {
            self.line(format!("\n   DeepCite v{}\n", env!("CARGO_PKG_VERSION")));
        }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            self.line(format!("  {} {}", "✓".green().bold(), message.green()));
        } else {
            self.line(format!("  [OK] {}", message));
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            self.line(format!("  {} {}", "•".blue(), message));
        } else {
            self.line(format!("  [INFO] {}", message));
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            self.line(format!("  {} {}", "⚠".yellow().bold(), message.yellow()));
        } else {
            self.line(format!("  [WARN] {}", message));
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            self.line(format!("    {}: {}", key.dimmed(), value.bright_white()));
        } else {
            self.line(format!("    {}: {}", key, value));
        }
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            self.line(format!("\n  {}", title.bright_white().bold().underline()));
        } else {
            self.line(format!("\n  === {} ===", title));
        }
    }

    /// One line per progress event
    pub fn event(&self, event: &ProgressEvent) {
        let seq = format!("#{:<3}", event.sequence);
        let seq = if self.colored {
            seq.dimmed().to_string()
        } else {
            seq
        };

        match &event.kind {
            EventKind::StageStarted { stage } => {
                self.info(&format!("{seq} {stage} started"));
            }
            EventKind::StageCompleted { stage } => {
                self.success(&format!("{seq} {stage} completed"));
            }
            EventKind::PartialResult(result) => {
                self.info(&format!("{seq} {}", describe(result)));
            }
            EventKind::Warning { message, .. } => self.warning(&format!("{seq} {message}")),
            EventKind::Error { stage, message } => {
                self.error(&format!("{seq} {stage}: {message}"))
            }
            EventKind::Terminal { state, .. } => self.info(&format!("{seq} run {state}")),
        }
    }

    /// Final report, or the reason there is none
    pub fn outcome(&self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Completed {
                final_draft,
                deliverable,
                publish_error,
                resolution,
                sources,
            } => {
                self.header("Report");
                self.kv("draft version", &final_draft.version.to_string());
                self.kv("review", &format!("{resolution:?}").to_lowercase());
                self.kv("sources", &sources.len().to_string());
                if let Some(error) = publish_error {
                    self.warning(&format!("publishing failed: {error}"));
                }
                self.line("");
                match deliverable {
                    Some(deliverable) => self.line(&deliverable.body),
                    None => self.line(&final_draft.body),
                }
            }
            RunOutcome::Failed { stage, cause, .. } => {
                self.error(&format!("research failed while {stage}: {cause}"));
            }
            RunOutcome::Cancelled { stage } => {
                self.warning(&format!("research cancelled while {stage}"));
            }
        }
    }
}

fn describe(result: &PartialResult) -> String {
    match result {
        PartialResult::SubQuestionsPlanned { questions } => {
            format!("planned {} sub-questions: {}", questions.len(), questions.join(" | "))
        }
        PartialResult::EvidenceGathered {
            sub_question,
            items,
        } => format!("sub-question {sub_question}: {items} snippets"),
        PartialResult::ContextAggregated { items, sources } => {
            format!("context: {items} snippets from {sources} sources")
        }
        PartialResult::DraftProduced { version } => format!("draft v{version} written"),
        PartialResult::CritiqueReceived {
            version,
            verdict,
            issues,
        } => format!("review of v{version}: {verdict:?} ({issues} issues)").to_lowercase(),
    }
}
