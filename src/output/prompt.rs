//! Prompt detection over sanitized terminal output.
//!
//! Interactive agents surface approval dialogs only as terminal text:
//! a header line ("Do you want to run this command?") followed by a
//! numbered option list, with `❯` marking the selected entry. The detector
//! keeps a small window of recent lines and re-parses it as output
//! arrives, deduplicating by prompt signature so terminal redraws do not
//! re-emit the same dialog.

use std::collections::VecDeque;

use crate::session::{PendingPermission, PermissionOption};

/// Lines of context retained for prompt parsing
const WINDOW_LINES: usize = 40;

#[derive(Debug, Clone, PartialEq)]
pub enum PromptEvent {
    Permission(PendingPermission),
    Question(String),
    /// Synthesized assistant text for an out-of-band failure
    ContextExhausted(String),
}

pub struct PromptDetector {
    window: VecDeque<String>,
    last_signature: Option<String>,
    context_notice_sent: bool,
}

impl PromptDetector {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_LINES),
            last_signature: None,
            context_notice_sent: false,
        }
    }

    /// Feed a batch of sanitized output; returns any newly-detected prompts.
    pub fn observe(&mut self, text: &str) -> Vec<PromptEvent> {
        let mut events = Vec::new();

        for line in text.split('\n') {
            let line = line.trim_end();
            if self.window.len() == WINDOW_LINES {
                self.window.pop_front();
            }
            self.window.push_back(line.to_string());
        }

        if !self.context_notice_sent && context_exhausted(text) {
            self.context_notice_sent = true;
            events.push(PromptEvent::ContextExhausted(
                "The session ran out of context window and stopped before \
                 producing a reply."
                    .to_string(),
            ));
        }

        match self.scan_window() {
            Some(event) => {
                let signature = prompt_signature(&event);
                if self.last_signature.as_deref() != Some(signature.as_str()) {
                    self.last_signature = Some(signature);
                    events.push(event);
                }
            }
            // Once the dialog has scrolled out of the window it was
            // answered or dismissed; an identical future dialog is new.
            None => self.last_signature = None,
        }

        events
    }

    fn scan_window(&self) -> Option<PromptEvent> {
        let lines: Vec<&str> = self.window.iter().map(|s| s.as_str()).collect();
        let header_idx = lines
            .iter()
            .rposition(|line| is_permission_header(line))?;
        let header = lines[header_idx].trim();

        let mut options = Vec::new();
        let mut preview_lines = Vec::new();
        for line in &lines[header_idx + 1..] {
            if let Some(option) = parse_option(line) {
                options.push(option);
            } else if options.is_empty() && !line.trim().is_empty() {
                preview_lines.push(line.trim().to_string());
            } else if !options.is_empty() && !line.trim().is_empty() {
                // Dialog body ended
                break;
            }
        }

        if options.len() >= 2 {
            let preview = if preview_lines.is_empty() {
                None
            } else {
                Some(preview_lines.join("\n"))
            };
            return Some(PromptEvent::Permission(PendingPermission {
                kind: permission_kind(header).to_string(),
                target: extract_target(header),
                description: header.to_string(),
                preview,
                options,
            }));
        }

        // A trailing question with no option list is a free-form question
        // only when it is the most recent visible output.
        let is_last = lines[header_idx + 1..]
            .iter()
            .all(|line| line.trim().is_empty());
        if is_last {
            return Some(PromptEvent::Question(header.to_string()));
        }

        None
    }
}

impl Default for PromptDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn is_permission_header(line: &str) -> bool {
    let t = line.trim();
    if !t.ends_with('?') {
        return false;
    }
    t.starts_with("Do you want")
        || t.starts_with("Would you like")
        || t.starts_with("Allow ")
        || t.starts_with("May I")
        || t.starts_with("Proceed")
}

/// Parse a numbered option line: `❯ 1. Yes`, `2. Yes, and don't ask again`
fn parse_option(line: &str) -> Option<PermissionOption> {
    let trimmed = line.trim_start();
    let (selected, rest) = if let Some(rest) = trimmed.strip_prefix('❯') {
        (true, rest.trim_start())
    } else if let Some(rest) = trimmed.strip_prefix("> ") {
        (true, rest.trim_start())
    } else {
        (false, trimmed)
    };

    let dot = rest.find(". ")?;
    let key = &rest[..dot];
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let label = rest[dot + 2..].trim();
    if label.is_empty() {
        return None;
    }

    Some(PermissionOption {
        key: key.to_string(),
        label: label.to_string(),
        description: None,
        selected,
    })
}

fn permission_kind(header: &str) -> &'static str {
    let lower = header.to_lowercase();
    if lower.contains("edit") || lower.contains("write") || lower.contains("create") {
        "edit"
    } else if lower.contains("run") || lower.contains("execute") || lower.contains("command") {
        "command"
    } else {
        "tool"
    }
}

/// Best-effort target: a backtick-quoted span, else the first path-like token.
fn extract_target(header: &str) -> Option<String> {
    if let Some(start) = header.find('`') {
        if let Some(len) = header[start + 1..].find('`') {
            let quoted = &header[start + 1..start + 1 + len];
            if !quoted.is_empty() {
                return Some(quoted.to_string());
            }
        }
    }
    header
        .trim_end_matches('?')
        .split_whitespace()
        .find(|token| token.contains('/'))
        .map(|token| token.to_string())
}

fn context_exhausted(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("context window")
        && (lower.contains("exceeded")
            || lower.contains("exhausted")
            || lower.contains("full")
            || lower.contains("out of"))
        || lower.contains("context low")
}

fn prompt_signature(event: &PromptEvent) -> String {
    match event {
        PromptEvent::Permission(p) => {
            let mut sig = p.description.clone();
            for option in &p.options {
                sig.push('\u{1}');
                sig.push_str(&option.key);
                sig.push_str(&option.label);
            }
            sig
        }
        PromptEvent::Question(q) => format!("q:{q}"),
        PromptEvent::ContextExhausted(_) => "ctx".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_option, PromptDetector, PromptEvent};

    #[test]
    fn detects_permission_dialog_with_options() {
        let mut d = PromptDetector::new();
        let events = d.observe(
            "Do you want to run `cargo test`?\n\
             ❯ 1. Yes\n\
             2. Yes, and don't ask again\n\
             3. No, and tell Claude what to do differently\n",
        );
        assert_eq!(events.len(), 1);
        let PromptEvent::Permission(p) = &events[0] else {
            panic!("expected permission, got {events:?}");
        };
        assert_eq!(p.kind, "command");
        assert_eq!(p.target.as_deref(), Some("cargo test"));
        assert_eq!(p.options.len(), 3);
        assert!(p.options[0].selected);
        assert_eq!(p.options[0].key, "1");
        assert_eq!(p.options[1].label, "Yes, and don't ask again");
        assert!(!p.options[1].selected);
    }

    #[test]
    fn option_order_is_preserved() {
        let mut d = PromptDetector::new();
        let events = d.observe(
            "Do you want to edit src/main.rs?\n1. Yes\n❯ 2. No\n",
        );
        let PromptEvent::Permission(p) = &events[0] else {
            panic!("expected permission");
        };
        assert_eq!(p.kind, "edit");
        assert_eq!(p.target.as_deref(), Some("src/main.rs"));
        let keys: Vec<&str> = p.options.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["1", "2"]);
        assert!(p.options[1].selected);
    }

    #[test]
    fn redraw_does_not_reemit_same_prompt() {
        let dialog = "Do you want to run `ls`?\n❯ 1. Yes\n2. No\n";
        let mut d = PromptDetector::new();
        assert_eq!(d.observe(dialog).len(), 1);
        assert!(d.observe(dialog).is_empty());
        // Once the dialog scrolls out of the window, an identical one is new
        assert!(d.observe(&"output line\n".repeat(45)).is_empty());
        assert_eq!(d.observe(dialog).len(), 1);
    }

    #[test]
    fn trailing_question_without_options_is_a_question() {
        let mut d = PromptDetector::new();
        let events = d.observe("Would you like me to continue with the refactor?\n");
        assert_eq!(
            events,
            vec![PromptEvent::Question(
                "Would you like me to continue with the refactor?".to_string()
            )]
        );
    }

    #[test]
    fn plain_output_is_ignored() {
        let mut d = PromptDetector::new();
        assert!(d.observe("compiling foo v0.1.0\nwarning: unused variable\n").is_empty());
    }

    #[test]
    fn context_exhaustion_is_reported_once() {
        let mut d = PromptDetector::new();
        let events = d.observe("error: context window exceeded\n");
        assert!(matches!(events[0], PromptEvent::ContextExhausted(_)));
        assert!(d.observe("error: context window exceeded\n").is_empty());
    }

    #[test]
    fn parse_option_rejects_non_numbered_lines() {
        assert!(parse_option("  - bullet point").is_none());
        assert!(parse_option("not an option").is_none());
        assert!(parse_option("12a. nope").is_none());
        assert!(parse_option("3. ").is_none());
    }
}
