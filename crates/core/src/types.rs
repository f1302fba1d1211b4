use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff;
use crate::reassembler::BlockKind;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Human,
    Assistant,
}

// ── Structured payloads ───────────────────────────────────────

/// Per-guideline pass/fail result of a validation reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    checks: BTreeMap<String, bool>,
}

impl ValidationVerdict {
    pub fn from_checks(checks: impl IntoIterator<Item = (String, bool)>) -> Self {
        Self { checks: checks.into_iter().collect() }
    }

    /// True iff at least one check exists and every check passed.
    pub fn is_valid(&self) -> bool {
        !self.checks.is_empty() && self.checks.values().all(|&v| v)
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.checks.get(name).copied()
    }

    pub fn checks(&self) -> &BTreeMap<String, bool> {
        &self.checks
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Display label for a check name: "(required)", "guideline" and angle
    /// brackets removed, first letter capitalised.
    pub fn label(name: &str) -> String {
        let cleaned = name
            .replace("(required)", "")
            .replace("guideline", "")
            .replace(['<', '>'], "");
        let cleaned = cleaned.trim();
        let mut chars = cleaned.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

/// Before/after text of a rephrase plus their highlighted renderings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffPair {
    pub before: String,
    pub after: String,
    pub before_html: String,
    pub after_html: String,
}

impl DiffPair {
    /// Build the pair; renderings are only computed when [`Self::should_render`].
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        let mut pair = Self {
            before: before.into(),
            after: after.into(),
            ..Self::default()
        };
        pair.compare();
        pair
    }

    /// After-text is non-empty and differs from before-text, ignoring outer whitespace.
    pub fn should_render(&self) -> bool {
        !self.after.trim().is_empty() && self.after.trim() != self.before.trim()
    }

    /// Recompute the renderings from the current texts.
    pub fn compare(&mut self) {
        if self.should_render() {
            let (before_html, after_html) = diff::render(&self.before, &self.after);
            self.before_html = before_html;
            self.after_html = after_html;
        } else {
            self.before_html.clear();
            self.after_html.clear();
        }
    }
}

// ── Conversation ──────────────────────────────────────────────

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Index in the conversation, unique until reset.
    pub id: u64,
    pub sender: Sender,
    pub text: String,
    pub validation: Option<ValidationVerdict>,
    /// Rephrased text as parsed from the reply (progressive while streaming).
    pub rephrased: Option<String>,
    pub diff: Option<DiffPair>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub retries: u32,
}

impl Message {
    pub fn human(id: u64, text: impl Into<String>) -> Self {
        Self::new(id, Sender::Human, text.into(), false)
    }

    /// Assistant message still waiting for its streamed reply.
    pub fn pending_assistant(id: u64) -> Self {
        Self::new(id, Sender::Assistant, String::new(), true)
    }

    /// Assistant message with fixed text (not model generated).
    pub fn canned_assistant(id: u64, text: impl Into<String>) -> Self {
        Self::new(id, Sender::Assistant, text.into(), false)
    }

    fn new(id: u64, sender: Sender, text: String, is_loading: bool) -> Self {
        Self {
            id,
            sender,
            text,
            validation: None,
            rephrased: None,
            diff: None,
            is_loading,
            error: None,
            retries: 0,
        }
    }
}

/// Linear submission workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubmissionStep {
    Validate,
    Rephrase,
    Save,
}

impl SubmissionStep {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Validate => Some(Self::Rephrase),
            Self::Rephrase => Some(Self::Save),
            Self::Save => None,
        }
    }

    pub fn prev(self) -> Option<Self> {
        match self {
            Self::Validate => None,
            Self::Rephrase => Some(Self::Validate),
            Self::Save => Some(Self::Rephrase),
        }
    }

    /// Structured block a reply in this step carries.
    pub fn block_kind(self) -> BlockKind {
        match self {
            Self::Rephrase => BlockKind::CodeFence,
            Self::Validate | Self::Save => BlockKind::FrontMatter,
        }
    }

    /// Model replies in these steps are retried on throttling.
    pub fn retries_transient(self) -> bool {
        matches!(self, Self::Validate | Self::Rephrase)
    }
}

/// In-flight indicators a view binds to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingFlags {
    pub chat_message: bool,
    pub query_model: bool,
    pub extract_customer: bool,
    pub save: bool,
}

/// Full state of one submission conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub category: String,
    pub messages: Vec<Message>,
    pub step: SubmissionStep,
    pub submission_text: String,
    pub customer: String,
    pub is_validated: bool,
    pub has_extracted_customer: bool,
    /// Assigned on the first save attempt and kept until reset.
    pub submission_ts: Option<String>,
    pub loading: LoadingFlags,
}

impl Conversation {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: category.into(),
            messages: Vec::new(),
            step: SubmissionStep::Validate,
            submission_text: String::new(),
            customer: String::new(),
            is_validated: false,
            has_extracted_customer: false,
            submission_ts: None,
            loading: LoadingFlags::default(),
        }
    }

    /// More than the opening message exists.
    pub fn has_active_session(&self) -> bool {
        self.messages.len() > 1
    }

    pub fn next_message_id(&self) -> u64 {
        self.messages.len() as u64
    }

    pub fn message(&self, id: u64) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: u64) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Where the view should go next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    ViewSavedSubmission { saved_ts: String },
}

// ── Tables ────────────────────────────────────────────────────

/// One saved submission row. Field order is the serialization order the
/// fingerprint is computed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableItem {
    pub row_num: u32,
    pub submission_ts: String,
    pub name: String,
    pub customer: String,
    pub category: String,
    pub text: String,
}

/// Recommendation ordering returned by the aggregation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub row_nums: Vec<u32>,
    pub preamble: String,
    pub explanations: Vec<String>,
}
