//! Inbound fragments reach the controller that asked for them.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::mpsc;
use url::Url;

use quill_channel::api::{MockBackend, StaticCredentials};
use quill_channel::frame::CorrelationKey;
use quill_channel::session::{ChannelError, ChannelSession, Connection, Connector, FrameHandler};
use quill_core::config::QuillCfg;
use quill_core::conversation::ConversationController;
use quill_core::router::FrameRouter;
use quill_core::table::TableController;
use quill_core::types::TableItem;
use quill_core::ui::UiStore;

struct Fixture {
    router: Arc<FrameRouter>,
    mock: Arc<MockBackend>,
    achievement: ConversationController,
    challenge: ConversationController,
    table: TableController,
}

fn fixture() -> Fixture {
    let mock = Arc::new(MockBackend::new());
    let ui = UiStore::new();
    let cfg = Arc::new(QuillCfg::default());
    let router = Arc::new(FrameRouter::new());

    let (achievement, _) = ConversationController::new("achievement", cfg.clone(), mock.clone(), ui.clone());
    let (challenge, _) = ConversationController::new("challenge", cfg.clone(), mock.clone(), ui.clone());
    let table = TableController::new("manager-achievement", cfg, mock.clone(), ui);
    router.register_conversation(achievement.clone());
    router.register_conversation(challenge.clone());
    router.register_table(table.clone());
    Fixture { router, mock, achievement, challenge, table }
}

fn chat(category: &str, message_id: u64) -> CorrelationKey {
    CorrelationKey::Chat { category: category.into(), message_id }
}

fn reply_text(ctrl: &ConversationController, id: u64) -> String {
    ctrl.snapshot().message(id).map(|m| m.text.clone()).unwrap_or_default()
}

#[tokio::test]
async fn chat_fragments_go_to_their_category() {
    let f = fixture();
    f.achievement.query_model("How long should it be?").await;
    f.challenge.query_model("What counts as a challenge?").await;
    assert_eq!(f.mock.calls().len(), 2);

    f.router.on_fragment(chat("challenge", 2), "Anything that ".into());
    f.router.on_fragment(chat("achievement", 2), "Three sentences.".into());
    f.router.on_fragment(chat("challenge", 2), "blocked you.".into());
    f.router.on_fragment(chat("achievement", 2), "<END>".into());

    assert_eq!(reply_text(&f.achievement, 2), "Three sentences.");
    assert!(!f.achievement.snapshot().loading.query_model);
    assert_eq!(reply_text(&f.challenge, 2), "Anything that blocked you.");
    assert!(f.challenge.snapshot().loading.query_model);
}

#[tokio::test]
async fn unknown_owners_are_dropped() {
    let f = fixture();
    f.achievement.query_model("hello").await;
    f.router.on_fragment(chat("feedback", 2), "stray".into());
    f.router.on_fragment(CorrelationKey::CombinedText { table: "associate".into() }, "stray".into());
    assert_eq!(reply_text(&f.achievement, 2), "");
    assert!(f.router.conversation("feedback").is_none());
    assert!(f.router.table("associate").is_none());
}

#[tokio::test]
async fn table_fragments_reach_the_table() {
    let f = fixture();
    f.table.set_items(vec![TableItem {
        row_num: 1,
        submission_ts: "2024-01-01T09:00:00.000000".into(),
        name: "Dana".into(),
        customer: "Acme".into(),
        category: "achievement".into(),
        text: "Shipped v2".into(),
    }]);
    f.table.select(&[1]);
    f.table.request_combined().await;

    let key = CorrelationKey::CombinedText { table: "manager-achievement".into() };
    f.router.on_fragment(key.clone(), "Dana shipped v2.".into());
    f.router.on_fragment(key, "<END>".into());
    assert_eq!(f.table.snapshot().combined_text, "Dana shipped v2.");
    assert!(f.router.table("manager-achievement").is_some());
}

/// In-memory connector; the test keeps the far end of each connection.
#[derive(Default)]
struct Loopback {
    peers: Mutex<Vec<(mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>)>>,
}

#[async_trait::async_trait]
impl Connector for Loopback {
    async fn connect(&self, _url: Url) -> Result<Connection, ChannelError> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.peers.lock().unwrap().push((in_tx, out_rx));
        Ok(Connection { outbound: out_tx, inbound: in_rx })
    }
}

impl Loopback {
    fn push(&self, frame: serde_json::Value) {
        self.peers.lock().unwrap()[0].0.send(frame.to_string()).unwrap();
    }

    fn connected(&self) -> bool {
        !self.peers.lock().unwrap().is_empty()
    }
}

#[tokio::test]
async fn frames_from_the_channel_drive_controllers() {
    let f = fixture();
    let connector = Arc::new(Loopback::default());
    let session = Arc::new(ChannelSession::new(
        Url::parse("wss://example.test/ws").unwrap(),
        connector.clone(),
        Arc::new(StaticCredentials::new("id", "access", "Dana")),
        f.router.clone(),
    ));

    let live = tokio::spawn({
        let session = session.clone();
        async move { session.ensure_active().await }
    });
    while !connector.connected() {
        tokio::task::yield_now().await;
    }
    connector.push(json!({"statusCode": 200, "connectionId": "conn-7"}));
    assert_eq!(live.await.unwrap().unwrap(), "conn-7");

    f.achievement.query_model("How long should it be?").await;
    connector.push(json!({"action": "achievement", "message_id": 2, "text": "Keep it short."}));
    connector.push(json!({"action": "achievement", "message_id": 2, "text": "<END>"}));
    // malformed and unroutable frames are skipped
    connector.push(json!({"action": "tableStore/manager-achievement", "message_id": "other", "text": "x"}));
    connector.push(json!({"unexpected": true}));

    while f.achievement.snapshot().loading.query_model {
        tokio::task::yield_now().await;
    }
    assert_eq!(reply_text(&f.achievement, 2), "Keep it short.");
    assert_eq!(f.table.snapshot().combined_text, "");
}
