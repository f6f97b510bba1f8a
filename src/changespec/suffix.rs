//! The suffix algebra shared by statuses, commit entries, hook status
//! lines, and comment entries.
//!
//! A suffix renders as ` - (PREFIX MSG)` at end-of-line. The prefix token
//! encodes the kind; unprefixed suffixes are free-form. The parse/render
//! pair here is the only place the string forms are handled — everything
//! else works with the tagged [`Suffix`] value.

use crate::timestamps;

/// Error messages that imply the `!:` prefix when a writer does not name a
/// kind explicitly.
pub const ERROR_SUFFIX_MESSAGES: [&str; 3] =
    ["ZOMBIE", "Hook Command Failed", "Unresolved Critique Comments"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuffixKind {
    /// `!:` — attention required; blocks ready-to-mail.
    Error,
    /// `@:` (or bare `@` when the message is empty) — agent subprocess live.
    RunningAgent,
    /// `$:` — hook subprocess live; the message is the pgid.
    RunningProcess,
    /// `~@:` — agent was terminated.
    KilledAgent,
    /// `~$:` — process was terminated.
    KilledProcess,
    /// `?$:` — pid gone but no exit marker observed yet.
    PendingDead,
    /// `%:` — summary attached; fix-hook eligible.
    SummarizeComplete,
    /// `~:` — error accepted for a terminal ChangeSpec.
    Acknowledged,
    /// No prefix; free-form message.
    Plain,
}

impl SuffixKind {
    fn prefix(self) -> &'static str {
        match self {
            SuffixKind::Error => "!: ",
            SuffixKind::RunningAgent => "@: ",
            SuffixKind::RunningProcess => "$: ",
            SuffixKind::KilledAgent => "~@: ",
            SuffixKind::KilledProcess => "~$: ",
            SuffixKind::PendingDead => "?$: ",
            SuffixKind::SummarizeComplete => "%: ",
            SuffixKind::Acknowledged => "~: ",
            SuffixKind::Plain => "",
        }
    }
}

/// A parsed suffix: the message text plus its kind tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suffix {
    pub text: String,
    pub kind: SuffixKind,
}

impl Suffix {
    pub fn new(text: impl Into<String>, kind: SuffixKind) -> Self {
        Suffix { text: text.into(), kind }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Suffix::new(text, SuffixKind::Error)
    }

    pub fn running_agent(text: impl Into<String>) -> Self {
        Suffix::new(text, SuffixKind::RunningAgent)
    }

    pub fn running_process(pid: u32) -> Self {
        Suffix::new(pid.to_string(), SuffixKind::RunningProcess)
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Suffix::new(text, SuffixKind::Plain)
    }

    /// Build a suffix from a bare message, inferring the kind the way the
    /// writers do when none is named: known error messages, then agent
    /// timestamp shapes, then all-digit pids, then plain.
    pub fn infer(text: impl Into<String>) -> Self {
        let text = text.into();
        let kind = infer_kind(&text);
        Suffix { text, kind }
    }

    pub fn is_error(&self) -> bool {
        self.kind == SuffixKind::Error
    }

    /// Parse the inside of a ` - (...)` group into a suffix.
    ///
    /// Prefix tokens are matched longest-first so `~@:` never reads as `~:`
    /// followed by garbage. A bare `@` means a running agent with no
    /// message yet.
    pub fn parse(inner: &str) -> Suffix {
        let inner = inner.trim();
        if inner == "@" {
            return Suffix::new("", SuffixKind::RunningAgent);
        }
        let table: [(&str, SuffixKind); 8] = [
            ("~@:", SuffixKind::KilledAgent),
            ("~$:", SuffixKind::KilledProcess),
            ("?$:", SuffixKind::PendingDead),
            ("!:", SuffixKind::Error),
            ("@:", SuffixKind::RunningAgent),
            ("$:", SuffixKind::RunningProcess),
            ("%:", SuffixKind::SummarizeComplete),
            ("~:", SuffixKind::Acknowledged),
        ];
        for (token, kind) in table {
            if let Some(rest) = inner.strip_prefix(token) {
                return Suffix::new(rest.trim_start(), kind);
            }
        }
        Suffix::plain(inner)
    }

    /// Render the inside of the ` - (...)` group.
    pub fn render_inner(&self) -> String {
        if self.kind == SuffixKind::RunningAgent && self.text.is_empty() {
            return "@".to_string();
        }
        format!("{}{}", self.kind.prefix(), self.text)
    }

    /// Render the full ` - (...)` decoration.
    pub fn render(&self) -> String {
        format!(" - ({})", self.render_inner())
    }

    /// Rewrite an error suffix to acknowledged, preserving the message.
    pub fn acknowledge(&self) -> Suffix {
        Suffix::new(self.text.clone(), SuffixKind::Acknowledged)
    }
}

fn infer_kind(text: &str) -> SuffixKind {
    if ERROR_SUFFIX_MESSAGES.contains(&text) {
        return SuffixKind::Error;
    }
    if is_running_agent_text(text) {
        return SuffixKind::RunningAgent;
    }
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) && !timestamps::is_timestamp(text)
    {
        return SuffixKind::RunningProcess;
    }
    SuffixKind::Plain
}

/// Whether a message has the shape of a running-agent marker: either an
/// `<agent>-YYmmdd_HHMMSS` pair or a bare timestamp in either legacy form.
pub fn is_running_agent_text(text: &str) -> bool {
    timestamps::suffix_timestamp(text).is_some()
}
