//! Submission conversation: validate, then rephrase, then save.
//!
//! Requests are fire-and-forget; replies stream back through [`receive`]
//! and are folded by one [`Reassembler`] per assistant message. Throttled
//! replies are retried with exponential backoff by re-issuing the stored
//! request. A watchdog bounds how long a reply may take.
//!
//! [`receive`]: ConversationController::receive

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use quill_channel::api::Backend;

use crate::config::QuillCfg;
use crate::prompts;
use crate::reassembler::{Completion, Progress, Reassembler, ReassemblyState};
use crate::structured::{parse_rephrase, parse_verdict};
use crate::types::{Conversation, DiffPair, Message, Navigation, SubmissionStep};
use crate::ui::{AlertKind, GENERIC_ERROR, SAVE_ERROR, UiStore};
use crate::watchdog::Watchdog;

/// Error details that mean "try again later".
const TRANSIENT_MARKERS: [&str; 2] = ["throttlingException", "modelStreamErrorException"];
const TIMEOUT_DETAIL: &str = "Response timeout";
const REPHRASE_RESOURCE: &str = "rephrase";
const REPHRASE_REQUEST_TEXT: &str = "Please rephrase my submission.";
const EXTRACT_NAME_RESOURCE: &str = "extract_name";
const SAVE_RESOURCE: &str = "submission";
/// Placeholder the name extractor answers with when it finds nothing.
const NO_CUSTOMER_PLACEHOLDER: &str = "Enter customer name";

pub fn is_transient(detail: &str) -> bool {
    TRANSIENT_MARKERS.iter().any(|m| detail.contains(m))
}

/// Save timestamp: second precision, microseconds zero-padded.
pub fn submission_timestamp() -> String {
    format!("{}.000000", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S"))
}

/// Request behind an assistant message, kept for retries.
#[derive(Debug, Clone)]
struct PendingRequest {
    resource: String,
    payload: Value,
    step: SubmissionStep,
}

struct ChatState {
    conv: Conversation,
    streams: HashMap<u64, Reassembler>,
    requests: HashMap<u64, PendingRequest>,
}

impl ChatState {
    fn push_canned(&mut self, text: impl Into<String>) {
        let id = self.conv.next_message_id();
        self.conv.messages.push(Message::canned_assistant(id, text));
    }

    fn forget(&mut self, id: u64) {
        self.streams.remove(&id);
        self.requests.remove(&id);
    }
}

enum ErrorAction {
    Retry { delay: std::time::Duration, attempt: u32, conv_id: Uuid },
    Fatal,
    Ignore,
}

struct Inner {
    cfg: Arc<QuillCfg>,
    backend: Arc<dyn Backend>,
    ui: UiStore,
    watchdog: Watchdog,
    state: Mutex<ChatState>,
    view_tx: watch::Sender<Conversation>,
    nav_tx: mpsc::UnboundedSender<Navigation>,
}

/// Controller for one submission category.
#[derive(Clone)]
pub struct ConversationController {
    inner: Arc<Inner>,
}

/// Clears `loading.save` when the save finishes or is cancelled.
struct SaveInFlight<'a>(&'a ConversationController);

impl Drop for SaveInFlight<'_> {
    fn drop(&mut self) {
        self.0.update(|s| s.conv.loading.save = false);
    }
}

impl ConversationController {
    pub fn new(
        category: impl Into<String>,
        cfg: Arc<QuillCfg>,
        backend: Arc<dyn Backend>,
        ui: UiStore,
    ) -> (Self, mpsc::UnboundedReceiver<Navigation>) {
        let mut state = ChatState {
            conv: Conversation::new(category),
            streams: HashMap::new(),
            requests: HashMap::new(),
        };
        push_start_message(&mut state);
        let (view_tx, _) = watch::channel(state.conv.clone());
        let (nav_tx, nav_rx) = mpsc::unbounded_channel();
        let watchdog = Watchdog::new(cfg.watchdog());
        let ctrl = Self {
            inner: Arc::new(Inner {
                cfg,
                backend,
                ui,
                watchdog,
                state: Mutex::new(state),
                view_tx,
                nav_tx,
            }),
        };
        (ctrl, nav_rx)
    }

    pub fn category(&self) -> String {
        self.lock().conv.category.clone()
    }

    pub fn snapshot(&self) -> Conversation {
        self.lock().conv.clone()
    }

    /// Receives a snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<Conversation> {
        self.inner.view_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut state = self.lock();
        let out = f(&mut state);
        self.inner.view_tx.send_replace(state.conv.clone());
        out
    }

    // ── workflow ──

    /// Submit human input for the current step.
    pub async fn query_model(&self, input: &str) {
        let issued = self.update(|s| {
            if s.conv.loading.query_model {
                return None;
            }
            let step = s.conv.step;
            if step == SubmissionStep::Validate {
                s.conv.submission_text = input.trim().to_owned();
            }
            let human_text = match step {
                SubmissionStep::Rephrase => REPHRASE_REQUEST_TEXT,
                _ => input,
            };
            let human_id = s.conv.next_message_id();
            s.conv.messages.push(Message::human(human_id, human_text));

            let id = s.conv.next_message_id();
            s.conv.messages.push(Message::pending_assistant(id));
            s.conv.loading.query_model = true;
            s.conv.loading.chat_message = true;

            let resource = match step {
                SubmissionStep::Rephrase => REPHRASE_RESOURCE.to_owned(),
                _ => s.conv.category.clone(),
            };
            let payload = json!({
                "conversation_id": s.conv.id.to_string(),
                "action": s.conv.category,
                "query": input,
                "message_id": id,
            });
            s.streams.insert(id, Reassembler::new(step.block_kind()));
            s.requests.insert(id, PendingRequest { resource, payload, step });
            Some((id, s.conv.id))
        });

        match issued {
            Some((id, conv_id)) => self.issue(id, conv_id).await,
            None => tracing::warn!(category = %self.category(), "query ignored: a reply is still pending"),
        }
    }

    /// Ask for a rewrite of the current submission text.
    pub async fn request_rephrase(&self) {
        let (step, text) = {
            let s = self.lock();
            (s.conv.step, s.conv.submission_text.clone())
        };
        if step != SubmissionStep::Rephrase {
            tracing::warn!(?step, "rephrase requested outside the rephrase step");
            return;
        }
        self.query_model(&text).await;
    }

    async fn issue(&self, id: u64, conv_id: Uuid) {
        let request = self.lock().requests.get(&id).cloned();
        let Some(request) = request else { return };

        let this = self.clone();
        self.inner.watchdog.clear();
        self.inner.watchdog.start(move || this.fail(id, conv_id, TIMEOUT_DETAIL));

        tracing::info!(resource = %request.resource, message_id = id, "query issued");
        if let Err(e) = self.inner.backend.dispatch(&request.resource, request.payload).await {
            self.handle_error(id, &e.to_string());
        }
    }

    /// Route one streamed fragment for message `id`.
    pub fn receive(&self, id: u64, fragment: &str) {
        let progress = self.update(|s| {
            let loading = s.conv.message(id).is_some_and(|m| m.is_loading);
            let step = s.requests.get(&id).map(|r| r.step);
            let (true, Some(step), Some(stream)) = (loading, step, s.streams.get_mut(&id)) else {
                return Progress::Ignored;
            };
            let progress = stream.feed(fragment);
            let open = match stream.state() {
                ReassemblyState::InStructuredBlock => stream.open_block().map(str::to_owned),
                _ => None,
            };

            if let (Progress::Streaming { visible, block }, Some(msg)) = (&progress, s.conv.message_mut(id)) {
                msg.text.clone_from(visible);
                match step {
                    SubmissionStep::Rephrase => {
                        if let Some(text) = block.as_deref().or(open.as_deref()).and_then(parse_rephrase) {
                            msg.rephrased = Some(text);
                        }
                    }
                    _ => {
                        // partial verdicts are best-effort; the final parse decides
                        if let Some(verdict) = block.as_deref().and_then(|b| parse_verdict(b).ok()) {
                            msg.validation = Some(verdict);
                        }
                    }
                }
            }
            progress
        });

        match progress {
            Progress::Failed(detail) => self.handle_error(id, &detail),
            Progress::Completed(done) => self.complete(id, done),
            Progress::Ignored => tracing::debug!(message_id = id, "fragment for an idle message ignored"),
            Progress::Streaming { .. } => {}
        }
    }

    fn complete(&self, id: u64, done: Completion) {
        self.inner.watchdog.clear();
        let category = self.update(|s| {
            let step = s.requests.get(&id).map(|r| r.step).unwrap_or(s.conv.step);
            s.forget(id);
            let submission = s.conv.submission_text.trim().to_owned();
            let category = s.conv.category.clone();
            let Some(msg) = s.conv.message_mut(id) else { return None };
            msg.text = done.text;
            msg.is_loading = false;

            match step {
                SubmissionStep::Validate => match done.block.as_deref().map(parse_verdict) {
                    Some(Ok(verdict)) => {
                        let valid = verdict.is_valid();
                        msg.validation = Some(verdict);
                        if valid {
                            s.conv.is_validated = true;
                            s.conv.step = SubmissionStep::Rephrase;
                            s.push_canned(prompts::rephrase_instructions(&category));
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(message_id = id, error = %e, "unparsable verdict");
                        msg.validation = None;
                        s.conv.loading.query_model = false;
                        s.conv.loading.chat_message = false;
                        return Some(Err(category));
                    }
                    // no verdict means the input was a question, not a submission
                    None => s.conv.submission_text.clear(),
                },
                SubmissionStep::Rephrase => {
                    if let Some(text) = done.block.as_deref().and_then(parse_rephrase) {
                        msg.rephrased = Some(text.clone());
                        msg.diff = Some(DiffPair::new(submission, text.clone()));
                        s.conv.submission_text = text;
                        s.push_canned(prompts::after_diff_instructions());
                    }
                }
                SubmissionStep::Save => {}
            }
            s.conv.loading.query_model = false;
            s.conv.loading.chat_message = false;
            Some(Ok(category))
        });

        match category {
            Some(Ok(category)) => tracing::info!(%category, message_id = id, "reply complete"),
            Some(Err(_)) => {
                self.inner.ui.add_alert(AlertKind::Error, GENERIC_ERROR);
            }
            None => {}
        }
    }

    fn handle_error(&self, id: u64, detail: &str) {
        let max_retries = self.inner.cfg.max_retries;
        let action = self.update(|s| {
            let step = s.conv.step;
            let conv_id = s.conv.id;
            let Some(msg) = s.conv.message_mut(id).filter(|m| m.is_loading) else {
                return ErrorAction::Ignore;
            };
            if step.retries_transient() && is_transient(detail) && msg.retries < max_retries {
                let delay = self.inner.cfg.retry_delay(msg.retries);
                msg.retries += 1;
                return ErrorAction::Retry { delay, attempt: msg.retries, conv_id };
            }
            msg.error = Some(detail.to_owned());
            msg.is_loading = false;
            s.conv.loading.query_model = false;
            s.conv.loading.chat_message = false;
            s.forget(id);
            ErrorAction::Fatal
        });

        match action {
            ErrorAction::Retry { delay, attempt, conv_id } => {
                self.inner.watchdog.clear();
                tracing::warn!(message_id = id, attempt, delay_secs = delay.as_secs(), detail, "transient error, retrying");
                let this = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    this.retry(id, conv_id).await;
                });
            }
            ErrorAction::Fatal => {
                self.inner.watchdog.clear();
                tracing::error!(message_id = id, detail, "reply failed");
            }
            ErrorAction::Ignore => tracing::debug!(message_id = id, detail, "error for an idle message ignored"),
        }
    }

    /// Fatal error unless the conversation moved on or the reply already finished.
    fn fail(&self, id: u64, conv_id: Uuid, detail: &str) {
        let hit = self.update(|s| {
            if s.conv.id != conv_id {
                return false;
            }
            let Some(msg) = s.conv.message_mut(id).filter(|m| m.is_loading) else {
                return false;
            };
            msg.error = Some(detail.to_owned());
            msg.is_loading = false;
            s.conv.loading.query_model = false;
            s.conv.loading.chat_message = false;
            s.forget(id);
            true
        });
        if hit {
            tracing::error!(message_id = id, detail, "reply failed");
        }
    }

    async fn retry(&self, id: u64, conv_id: Uuid) {
        let ready = self.update(|s| {
            if s.conv.id != conv_id {
                return false;
            }
            let Some(kind) = s.requests.get(&id).map(|r| r.step.block_kind()) else {
                return false;
            };
            s.streams.insert(id, Reassembler::new(kind));
            if let Some(msg) = s.conv.message_mut(id) {
                msg.text.clear();
                msg.rephrased = None;
                msg.validation = None;
            }
            true
        });
        if ready {
            self.issue(id, conv_id).await;
        } else {
            tracing::debug!(message_id = id, "retry dropped: conversation was reset");
        }
    }

    /// Move one step forward. Entering `Save` without a customer asks the
    /// model for one.
    pub async fn advance(&self) -> bool {
        let entered = self.update(|s| {
            let next = s.conv.step.next()?;
            s.conv.step = next;
            Some((next, s.conv.customer.clone()))
        });
        let Some((step, customer)) = entered else { return false };
        if step == SubmissionStep::Save {
            if customer.is_empty() {
                self.extract_customer_name(false).await;
            } else {
                self.update(|s| {
                    if !s.conv.has_extracted_customer {
                        let text = prompts::save_instructions(&s.conv.category, &customer);
                        s.push_canned(text);
                        s.conv.has_extracted_customer = true;
                    }
                });
            }
        }
        true
    }

    pub fn retreat(&self) -> bool {
        self.update(|s| match s.conv.step.prev() {
            Some(prev) => {
                s.conv.step = prev;
                true
            }
            None => false,
        })
    }

    /// Ask the backend for the customer named in the submission.
    pub async fn extract_customer_name(&self, manual: bool) {
        let payload = self.update(|s| {
            s.conv.customer.clear();
            s.conv.loading.extract_customer = true;
            json!({"query": s.conv.submission_text, "conversation_id": s.conv.id.to_string()})
        });

        let reply = self.inner.backend.call(EXTRACT_NAME_RESOURCE, payload).await;
        self.update(|s| {
            s.conv.loading.extract_customer = false;
            let category = s.conv.category.clone();
            match reply {
                Ok(Value::String(raw)) => {
                    if s.conv.step != SubmissionStep::Save {
                        return;
                    }
                    let name = raw.replace(['<', '>'], "").trim().to_owned();
                    s.conv.customer = if name.contains(NO_CUSTOMER_PLACEHOLDER) { String::new() } else { name };
                    let text = if manual {
                        prompts::extract_customer_response(&category, &s.conv.customer)
                    } else {
                        prompts::save_instructions(&category, &s.conv.customer)
                    };
                    if !s.conv.has_extracted_customer {
                        s.push_canned(text);
                        s.conv.has_extracted_customer = true;
                    }
                }
                other => {
                    tracing::warn!(reply = ?other, "customer name extraction failed");
                    s.push_canned(prompts::extract_customer_response(&category, ""));
                }
            }
        });
    }

    pub fn set_submission_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.update(|s| s.conv.submission_text = text);
    }

    pub fn set_customer(&self, customer: impl Into<String>) {
        let customer = customer.into();
        self.update(|s| s.conv.customer = customer);
    }

    /// Save the submission. The timestamp is fixed by the first attempt and
    /// reused until reset. Returns the timestamp on success.
    pub async fn save(&self) -> Option<String> {
        let (ts, category, customer, text) = self.update(|s| {
            s.conv.loading.save = true;
            let ts = s.conv.submission_ts.get_or_insert_with(submission_timestamp).clone();
            (ts, s.conv.category.clone(), s.conv.customer.clone(), s.conv.submission_text.clone())
        });
        let in_flight = SaveInFlight(self);

        let saved = match self.inner.backend.user_name().await {
            Ok(name) => {
                let payload = json!({
                    "category": category,
                    "customer": customer,
                    "text": text,
                    "name": name,
                    "role": "associate",
                    "submission_ts": ts,
                });
                self.inner.backend.call(SAVE_RESOURCE, payload).await
            }
            Err(e) => Err(e),
        };
        drop(in_flight);

        match saved {
            Ok(_) => {
                tracing::info!(%category, submission_ts = %ts, "submission saved");
                self.inner.ui.add_alert(AlertKind::Success, prompts::save_success(&category, &customer));
                if self.inner.nav_tx.send(Navigation::ViewSavedSubmission { saved_ts: ts.clone() }).is_err() {
                    tracing::debug!("no navigation listener");
                }
                self.reset();
                Some(ts)
            }
            Err(e) => {
                tracing::error!(%category, error = %e, "save failed");
                self.inner.ui.add_alert(AlertKind::Error, SAVE_ERROR);
                None
            }
        }
    }

    /// Start over: new identity, only the opening message left.
    pub fn reset(&self) {
        self.inner.watchdog.clear();
        self.update(|s| {
            let category = std::mem::take(&mut s.conv.category);
            s.conv = Conversation::new(category);
            s.streams.clear();
            s.requests.clear();
            push_start_message(s);
        });
    }
}

fn push_start_message(s: &mut ChatState) {
    let text = prompts::start_message(&s.conv.category);
    if !text.is_empty() {
        s.push_canned(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_markers() {
        assert!(is_transient("throttlingException: slow down"));
        assert!(is_transient("An error occurred (modelStreamErrorException)"));
        assert!(!is_transient("validationException"));
    }

    #[test]
    fn timestamp_shape() {
        let ts = submission_timestamp();
        assert_eq!(ts.len(), "2024-01-01T00:00:00.000000".len());
        assert!(ts.ends_with(".000000"));
        assert_eq!(&ts[10..11], "T");
    }
}
