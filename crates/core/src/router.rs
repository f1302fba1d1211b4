use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use quill_channel::frame::CorrelationKey;
use quill_channel::session::FrameHandler;

use crate::conversation::ConversationController;
use crate::table::TableController;

/// Hands each inbound fragment to the controller that issued its request.
#[derive(Default)]
pub struct FrameRouter {
    conversations: RwLock<HashMap<String, ConversationController>>,
    tables: RwLock<HashMap<String, TableController>>,
}

impl FrameRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the controller's category, replacing any previous one.
    pub fn register_conversation(&self, ctrl: ConversationController) {
        let mut map = self.conversations.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(ctrl.category(), ctrl);
    }

    pub fn register_table(&self, ctrl: TableController) {
        let mut map = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(ctrl.table().to_owned(), ctrl);
    }

    pub fn conversation(&self, category: &str) -> Option<ConversationController> {
        self.conversations.read().unwrap_or_else(PoisonError::into_inner).get(category).cloned()
    }

    pub fn table(&self, table: &str) -> Option<TableController> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner).get(table).cloned()
    }
}

impl FrameHandler for FrameRouter {
    fn on_fragment(&self, key: CorrelationKey, text: String) {
        match &key {
            CorrelationKey::Chat { category, message_id } => match self.conversation(category) {
                Some(ctrl) => ctrl.receive(*message_id, &text),
                None => tracing::warn!(%category, message_id, "fragment for unknown conversation dropped"),
            },
            CorrelationKey::Recommendation { table, .. } | CorrelationKey::CombinedText { table } => {
                match self.table(table) {
                    Some(ctrl) => ctrl.receive(&key, &text),
                    None => tracing::warn!(%table, "fragment for unknown table dropped"),
                }
            }
        }
    }
}
