//! Before/after highlighting for rephrased text.
//!
//! Word-level diff from `similar`. Removed runs are wrapped in
//! `<span class="diff-text-removed">` in the before rendering, added runs in
//! `<span class="diff-text-added">` in the after rendering; unchanged runs
//! appear in both. Text is HTML-escaped.

use similar::{ChangeTag, TextDiff};

const REMOVED_CLASS: &str = "diff-text-removed";
const ADDED_CLASS: &str = "diff-text-added";

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// One side of the rendering. Consecutive marked tokens share a span.
#[derive(Default)]
struct Side {
    html: String,
    run: String,
}

impl Side {
    fn mark(&mut self, token: &str) {
        self.run.push_str(token);
    }

    fn plain(&mut self, token: &str, class: &str) {
        self.flush(class);
        self.html.push_str(&escape(token));
    }

    fn flush(&mut self, class: &str) {
        if !self.run.is_empty() {
            self.html.push_str(&format!("<span class=\"{class}\">{}</span>", escape(&self.run)));
            self.run.clear();
        }
    }

    fn finish(mut self, class: &str) -> String {
        self.flush(class);
        self.html
    }
}

/// Returns `(before_html, after_html)`.
pub fn render(before: &str, after: &str) -> (String, String) {
    let diff = TextDiff::from_words(before, after);
    let mut removed = Side::default();
    let mut added = Side::default();
    for change in diff.iter_all_changes() {
        let token = change.value();
        match change.tag() {
            ChangeTag::Equal => {
                removed.plain(token, REMOVED_CLASS);
                added.plain(token, ADDED_CLASS);
            }
            ChangeTag::Delete => removed.mark(token),
            ChangeTag::Insert => added.mark(token),
        }
    }
    (removed.finish(REMOVED_CLASS), added.finish(ADDED_CLASS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaced_word_is_marked_on_both_sides() {
        let (before, after) = render("we saved money", "we saved $10K");
        assert_eq!(before, "we saved <span class=\"diff-text-removed\">money</span>");
        assert_eq!(after, "we saved <span class=\"diff-text-added\">$10K</span>");
    }

    #[test]
    fn unchanged_text_survives_on_both_sides() {
        let (before, after) = render("  Saved $10k\tfor Acme ", "  Saved $20k\tfor Acme ");
        assert!(before.starts_with("  Saved "));
        assert!(before.ends_with("\tfor Acme "));
        assert!(after.contains("<span class=\"diff-text-added\">$20k</span>"));
    }

    #[test]
    fn identical_text_has_no_marks() {
        let (before, after) = render("same text", "same text");
        assert_eq!(before, "same text");
        assert_eq!(after, "same text");
    }

    #[test]
    fn markup_is_escaped() {
        let (_, after) = render("", "<b>&");
        assert_eq!(after, "<span class=\"diff-text-added\">&lt;b&gt;&amp;</span>");
    }
}
