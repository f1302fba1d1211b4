//! Plain-text rendering of controller snapshots.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use quill_core::table::TableView;
use quill_core::types::{Conversation, DiffPair, Message, Sender, TableItem, ValidationVerdict};
use quill_core::ui::{Alert, AlertKind};
use uuid::Uuid;

const ASSISTANT: &str = "Quill> ";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const RESET: &str = "\x1b[0m";

/// Turns successive conversation snapshots into the text not yet shown.
#[derive(Debug, Default)]
pub struct ChatPrinter {
    conversation: Option<Uuid>,
    printed: HashMap<u64, String>,
    finished: HashSet<u64>,
}

impl ChatPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output for everything that changed since the previous call.
    pub fn update(&mut self, conv: &Conversation) -> String {
        if self.conversation != Some(conv.id) {
            self.conversation = Some(conv.id);
            self.printed.clear();
            self.finished.clear();
        }

        let mut out = String::new();
        for msg in conv.messages.iter().filter(|m| m.sender == Sender::Assistant) {
            if self.finished.contains(&msg.id) {
                continue;
            }
            let shown = self.printed.get(&msg.id).map(String::as_str);
            match shown {
                None if msg.text.is_empty() && msg.is_loading => {}
                None => {
                    out.push_str(ASSISTANT);
                    out.push_str(&msg.text);
                }
                Some(prev) if msg.text.starts_with(prev) => out.push_str(&msg.text[prev.len()..]),
                // visible text can shrink once a partial marker resolves
                Some(_) => {
                    out.push('\n');
                    out.push_str(ASSISTANT);
                    out.push_str(&msg.text);
                }
            }
            if shown.is_some() || !msg.text.is_empty() || !msg.is_loading {
                self.printed.insert(msg.id, msg.text.clone());
            }
            if !msg.is_loading {
                self.finished.insert(msg.id);
                out.push('\n');
                out.push_str(&details(msg));
            }
        }
        out
    }
}

/// Verdict, diff and error lines shown under a finished reply.
fn details(msg: &Message) -> String {
    let mut out = String::new();
    if let Some(verdict) = &msg.validation {
        let _ = writeln!(out, "{}", verdict_line(verdict));
    }
    if let Some(diff) = msg.diff.as_ref().filter(|d| d.should_render()) {
        out.push_str(&diff_lines(diff));
    }
    if let Some(error) = &msg.error {
        let _ = writeln!(out, "  ! {error}");
    }
    out
}

pub fn verdict_line(verdict: &ValidationVerdict) -> String {
    let checks: Vec<String> = verdict
        .checks()
        .iter()
        .map(|(name, ok)| format!("[{}] {}", if *ok { "x" } else { " " }, ValidationVerdict::label(name)))
        .collect();
    format!("  {}", checks.join("  "))
}

pub fn diff_lines(diff: &DiffPair) -> String {
    format!(
        "  before: {}\n  after:  {}\n",
        ansi_from_html(&diff.before_html, RED),
        ansi_from_html(&diff.after_html, GREEN)
    )
}

/// Swap the highlight spans for terminal colours and undo the escaping.
fn ansi_from_html(html: &str, colour: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find("<span") {
        out.push_str(&rest[..start]);
        let Some(open_end) = rest[start..].find('>') else { break };
        out.push_str(colour);
        rest = &rest[start + open_end + 1..];
        match rest.find("</span>") {
            Some(close) => {
                out.push_str(&rest[..close]);
                out.push_str(RESET);
                rest = &rest[close + "</span>".len()..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out.replace("&lt;", "<").replace("&gt;", ">").replace("&quot;", "\"").replace("&amp;", "&")
}

pub fn status(conv: &Conversation, link: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "conversation {} ({})", conv.id, conv.category);
    let _ = writeln!(out, "  step:       {:?}", conv.step);
    let _ = writeln!(out, "  validated:  {}", conv.is_validated);
    let _ = writeln!(out, "  submission: {}", if conv.submission_text.is_empty() { "-" } else { &conv.submission_text });
    let _ = writeln!(out, "  customer:   {}", if conv.customer.is_empty() { "-" } else { &conv.customer });
    if let Some(ts) = &conv.submission_ts {
        let _ = writeln!(out, "  timestamp:  {ts}");
    }
    let _ = write!(out, "  channel:    {link}");
    out
}

pub fn alert(alert: &Alert) -> String {
    let tag = match alert.kind {
        AlertKind::Error => "error",
        AlertKind::Warning => "warning",
        AlertKind::Info => "info",
        AlertKind::Success => "success",
    };
    format!("[{tag}] {}", alert.text)
}

fn item_line(item: &TableItem, selected: bool) -> String {
    let day = item.submission_ts.split('T').next().unwrap_or_default();
    format!(
        "{} {:>3}  {day}  {:<16} {:<16} {}",
        if selected { "*" } else { " " },
        item.row_num,
        item.name,
        item.customer,
        item.text
    )
}

/// The current page plus any recommendation and combined text.
pub fn table(view: &TableView, page: &[TableItem]) -> String {
    let mut out = String::new();
    if view.is_loading_items {
        let _ = writeln!(out, "{}: loading...", view.table);
        return out;
    }
    let _ = writeln!(
        out,
        "{}: {} rows, page {}/{}",
        view.table,
        view.items.len(),
        view.current_page,
        view.total_pages
    );
    for item in page {
        let _ = writeln!(out, "{}", item_line(item, view.selected.contains(&item.row_num)));
    }
    if let Some(rec) = &view.recommendation {
        let state = if view.is_loading_recommendations { " (streaming)" } else { "" };
        let rows: Vec<String> = rec.row_nums.iter().map(u32::to_string).collect();
        let _ = writeln!(out, "recommended{state}: {}", rows.join(", "));
        if !rec.preamble.is_empty() {
            let _ = writeln!(out, "  {}", rec.preamble);
        }
        for (row, why) in rec.row_nums.iter().zip(&rec.explanations) {
            let _ = writeln!(out, "  {row}: {why}");
        }
    } else if view.is_loading_recommendations {
        let _ = writeln!(out, "recommending...");
    }
    if !view.combined_text.is_empty() || view.is_loading_combined {
        let state = if view.is_loading_combined { " (streaming)" } else { "" };
        let _ = writeln!(out, "combined{state}:\n  {}", view.combined_text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant(id: u64, text: &str, loading: bool) -> Message {
        let mut m = Message::pending_assistant(id);
        m.text = text.into();
        m.is_loading = loading;
        m
    }

    #[test]
    fn prints_only_new_text() {
        let mut printer = ChatPrinter::new();
        let mut conv = Conversation::new("achievement");
        conv.messages.push(Message::canned_assistant(0, "Hi."));
        assert_eq!(printer.update(&conv), "Quill> Hi.\n");
        assert_eq!(printer.update(&conv), "");

        conv.messages.push(Message::human(1, "shipped"));
        conv.messages.push(assistant(2, "", true));
        assert_eq!(printer.update(&conv), "");
        conv.messages[2] = assistant(2, "Nice", true);
        assert_eq!(printer.update(&conv), "Quill> Nice");
        conv.messages[2] = assistant(2, "Nice work.", false);
        assert_eq!(printer.update(&conv), " work.\n");
    }

    #[test]
    fn reprints_when_text_shrinks() {
        let mut printer = ChatPrinter::new();
        let mut conv = Conversation::new("achievement");
        conv.messages.push(assistant(0, "Ok --", true));
        printer.update(&conv);
        conv.messages[0] = assistant(0, "Ok", false);
        assert_eq!(printer.update(&conv), "\nQuill> Ok\n");
    }

    #[test]
    fn new_conversation_starts_over() {
        let mut printer = ChatPrinter::new();
        let mut conv = Conversation::new("challenge");
        conv.messages.push(Message::canned_assistant(0, "Hi."));
        printer.update(&conv);
        let mut fresh = Conversation::new("challenge");
        fresh.messages.push(Message::canned_assistant(0, "Hi."));
        assert_eq!(printer.update(&fresh), "Quill> Hi.\n");
    }

    #[test]
    fn diff_spans_become_colours() {
        let diff = DiffPair::new("we saved money", "we saved $10K & more");
        let out = diff_lines(&diff);
        assert!(out.contains(&format!("{RED}money{RESET}")));
        assert!(out.contains("$10K & more"));
        assert!(!out.contains("<span"));
    }

    #[test]
    fn verdict_checkboxes() {
        let v = ValidationVerdict::from_checks([("impact".into(), true), ("customer".into(), false)]);
        assert_eq!(verdict_line(&v), "  [ ] Customer  [x] Impact");
    }
}
