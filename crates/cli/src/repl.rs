use std::io::{self, Write};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use quill_channel::session::{ChannelSession, LinkState};
use quill_core::config::QuillCfg;
use quill_core::conversation::ConversationController;
use quill_core::router::FrameRouter;
use quill_core::table::{TableController, TableView};
use quill_core::types::{Navigation, SubmissionStep};
use quill_core::ui::{Alert, UiStore};

use crate::command::{Command, HELP};
use crate::event::{InputEvent, spawn_input_thread};
use crate::render::{self, ChatPrinter};

const PROMPT: &str = "You> ";

/// Everything the REPL drives.
pub struct App {
    pub cfg: Arc<QuillCfg>,
    pub ui: UiStore,
    pub session: Arc<ChannelSession>,
    pub router: Arc<FrameRouter>,
    pub conversation: ConversationController,
}

/// Mutable REPL state beside the controllers.
struct Repl {
    app: App,
    table: Option<TableController>,
    table_rx: Option<watch::Receiver<TableView>>,
    /// Print the table once its streamed aggregations settle.
    table_pending: bool,
    alerts: AlertFeed,
}

/// Which alerts have been printed. Ids restart once the list is drained.
#[derive(Debug, Default)]
struct AlertFeed {
    last: Option<u64>,
}

impl AlertFeed {
    /// Alerts not printed yet, marking them printed.
    fn fresh<'a>(&mut self, alerts: &'a [Alert]) -> &'a [Alert] {
        let newest = alerts.last().map(|a| a.id);
        if newest < self.last {
            self.last = None;
        }
        let seen = self.last;
        let start = alerts.iter().position(|a| seen.is_none_or(|last| a.id > last)).unwrap_or(alerts.len());
        if newest.is_some() {
            self.last = newest;
        }
        &alerts[start..]
    }

    fn drained(&mut self) {
        self.last = None;
    }
}

enum Flow {
    Continue,
    Quit,
}

pub async fn run(
    app: App,
    mut nav_rx: mpsc::UnboundedReceiver<Navigation>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let mut conv_rx = app.conversation.subscribe();
    let mut alerts_rx = app.ui.subscribe();
    let mut printer = ChatPrinter::new();
    let mut repl = Repl { app, table: None, table_rx: None, table_pending: false, alerts: AlertFeed::default() };

    emit(&printer.update(&conv_rx.borrow_and_update()))?;
    println!("type /help for commands");

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<InputEvent>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<String>();
    spawn_input_thread(line_tx, ready_rx);
    request_next_prompt(&ready_tx);
    let mut waiting_for_reply = false;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                let text = match line {
                    InputEvent::Line(text) => text,
                    InputEvent::Interrupted => {
                        token.cancel();
                        break;
                    }
                    InputEvent::Eof => break,
                    InputEvent::Error(err) => {
                        eprintln!("input error: {err}");
                        break;
                    }
                };
                if text.trim().is_empty() {
                    request_next_prompt(&ready_tx);
                    continue;
                }
                let flow = tokio::select! {
                    _ = token.cancelled() => Flow::Quit,
                    flow = repl.execute(&text) => flow,
                };
                if matches!(flow, Flow::Quit) {
                    break;
                }
                if repl.busy() {
                    waiting_for_reply = true;
                } else {
                    request_next_prompt(&ready_tx);
                }
            }
            changed = conv_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let conv = conv_rx.borrow_and_update().clone();
                emit(&printer.update(&conv))?;
            }
            changed = alerts_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let alerts = alerts_rx.borrow_and_update().clone();
                for alert in repl.alerts.fresh(&alerts) {
                    println!("{}", render::alert(alert));
                }
            }
            _ = table_changed(&mut repl.table_rx) => {
                repl.print_table_if_settled();
            }
            nav = nav_rx.recv() => {
                if let Some(Navigation::ViewSavedSubmission { saved_ts }) = nav {
                    println!("saved submission {saved_ts}");
                }
            }
        }

        if waiting_for_reply && !repl.busy() {
            waiting_for_reply = false;
            request_next_prompt(&ready_tx);
        }
    }
    drop(ready_tx);
    println!();
    Ok(())
}

/// Resolves when the active table publishes a new view; never without one.
async fn table_changed(rx: &mut Option<watch::Receiver<TableView>>) {
    match rx {
        Some(rx) => {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

fn emit(text: &str) -> anyhow::Result<()> {
    if !text.is_empty() {
        print!("{text}");
        io::stdout().flush()?;
    }
    Ok(())
}

fn request_next_prompt(ready_tx: &std::sync::mpsc::Sender<String>) {
    let _ = ready_tx.send(PROMPT.to_owned());
}

fn link_label(state: LinkState) -> String {
    match state {
        LinkState::Disconnected => "disconnected".into(),
        LinkState::Connecting => "connecting".into(),
        LinkState::Live(id) => format!("live ({id})"),
    }
}

impl Repl {
    fn busy(&self) -> bool {
        let conv = self.app.conversation.snapshot();
        conv.loading.query_model || self.table_busy()
    }

    fn table_busy(&self) -> bool {
        self.table.as_ref().is_some_and(|t| {
            let v = t.snapshot();
            v.is_loading_items || v.is_loading_recommendations || v.is_loading_combined
        })
    }

    fn print_table(&self) {
        if let Some(table) = &self.table {
            print!("{}", render::table(&table.snapshot(), &table.page_items()));
        }
    }

    fn print_table_if_settled(&mut self) {
        if let Some(rx) = &mut self.table_rx {
            rx.borrow_and_update();
        }
        if self.table_pending && !self.table_busy() {
            self.table_pending = false;
            self.print_table();
        }
    }

    /// After a table command: print now, or once the aggregations finish.
    fn show_table(&mut self) {
        if self.table_busy() {
            self.table_pending = true;
        } else {
            self.print_table();
        }
    }

    fn active_table(&self) -> Option<&TableController> {
        if self.table.is_none() {
            println!("no table loaded, use /table <type> first");
        }
        self.table.as_ref()
    }

    async fn execute(&mut self, line: &str) -> Flow {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                return Flow::Continue;
            }
        };
        tracing::debug!(?command, "repl command");
        let conv = &self.app.conversation;

        match command {
            Command::Text(text) => {
                if conv.snapshot().step == SubmissionStep::Validate {
                    conv.query_model(&text).await;
                } else {
                    conv.set_submission_text(text);
                    println!("submission text updated");
                }
            }
            Command::Rephrase => conv.request_rephrase().await,
            Command::Next => {
                if !conv.advance().await {
                    println!("already at the last step");
                }
            }
            Command::Back => {
                if !conv.retreat() {
                    println!("already at the first step");
                }
            }
            Command::Customer(name) => conv.set_customer(name),
            Command::Extract => conv.extract_customer_name(true).await,
            Command::Save => {
                if conv.save().await.is_none() {
                    println!("not saved");
                }
            }
            Command::Reset => conv.reset(),
            Command::Status => {
                println!("{}", render::status(&conv.snapshot(), &link_label(self.app.session.state())));
            }
            Command::Alerts => {
                let alerts = self.app.ui.alerts();
                if alerts.is_empty() {
                    println!("no alerts");
                }
                for alert in alerts {
                    println!("{}", render::alert(&alert));
                    self.app.ui.remove_alert(alert.id);
                }
                self.alerts.drained();
            }
            Command::Table { table, months_back } => {
                let Some(ctrl) = self.app.router.table(&table) else {
                    println!("unknown table {table}");
                    return Flow::Continue;
                };
                ctrl.set_month(months_back);
                self.table_rx = Some(ctrl.subscribe());
                self.table = Some(ctrl.clone());
                ctrl.fetch_items().await;
                self.show_table();
            }
            Command::Recommend => {
                let Some(table) = self.active_table().cloned() else { return Flow::Continue };
                self.app.ui.set_show_genai_insights(true);
                table.request_recommendations().await;
                self.show_table();
            }
            Command::Select(rows) => {
                let Some(table) = self.active_table().cloned() else { return Flow::Continue };
                table.select(&rows);
                self.show_table();
            }
            Command::Combine => {
                let Some(table) = self.active_table().cloned() else { return Flow::Continue };
                if table.snapshot().selected.is_empty() {
                    println!("nothing selected, use /select <rows> first");
                    return Flow::Continue;
                }
                self.app.ui.set_show_combined_dialog(true);
                table.request_combined().await;
                self.show_table();
            }
            Command::Config => {
                for (key, value, description) in self.app.cfg.to_entries() {
                    println!("{key:<22} = {value:<32} # {description}");
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }
}
