use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::exchange::{self, ExchangeSettings, ReplyEvent};
use crate::message::{ChatTurn, Conversation};
use crate::ollama::OllamaClient;
use crate::theme::Theme;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub config: Config,
    pub theme: Theme,
    pub selected_model: String,
    /// Write model choices back to the config file
    pub persist_choices: bool,

    // Conversation state
    pub conversation: Conversation,
    pub input: String,
    pub cursor: usize,
    pub loading: bool,
    pub pending_idx: Option<usize>,
    /// Bumped on every submit so stale timer events can be told apart
    pub exchange_id: u64,
    pub animation_frame: u8,

    // Scroll state, sizes written back by the renderer
    pub scroll: u16,
    pub follow_bottom: bool,
    pub chat_height: u16,
    pub chat_width: u16,
    pub total_chat_lines: u16,
    pub chat_area: Option<Rect>,

    // Model picker
    pub show_model_picker: bool,
    pub available_models: Vec<String>,
    pub model_picker_state: ListState,
    pub status: Option<String>,

    pub ollama: OllamaClient,
    reply_tx: mpsc::UnboundedSender<ReplyEvent>,
    reply_rx: mpsc::UnboundedReceiver<ReplyEvent>,
    notice_timer: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let ollama = OllamaClient::new(&config.base_url);
        let theme = Theme::named(config.theme);
        let selected_model = config.default_model.clone();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            config,
            theme,
            selected_model,
            persist_choices: false,

            conversation: Conversation::new(),
            input: String::new(),
            cursor: 0,
            loading: false,
            pending_idx: None,
            exchange_id: 0,
            animation_frame: 0,

            scroll: 0,
            follow_bottom: true,
            chat_height: 0,
            chat_width: 0,
            total_chat_lines: 0,
            chat_area: None,

            show_model_picker: false,
            available_models: Vec::new(),
            model_picker_state: ListState::default(),
            status: None,

            ollama,
            reply_tx,
            reply_rx,
            notice_timer: None,
        }
    }

    /// Send the current input. Ignored for blank input or while a reply is
    /// in flight.
    pub fn submit(&mut self) -> bool {
        if self.input.trim().is_empty() || self.loading {
            return false;
        }

        let text = std::mem::take(&mut self.input);
        self.cursor = 0;
        self.conversation.push_user(text.clone());
        self.loading = true;

        let turns = if self.config.include_history {
            self.conversation.history()
        } else {
            vec![ChatTurn::user(text)]
        };
        self.pending_idx = Some(self.conversation.begin_pending());
        self.exchange_id += 1;
        self.follow_bottom = true;

        info!(model = %self.selected_model, turns = turns.len(), "sending message");

        let delay = self.config.notice_delay();
        let timer_tx = self.reply_tx.clone();
        let id = self.exchange_id;
        self.notice_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer_tx.send(ReplyEvent::StillWorking(id));
        }));

        let settings = ExchangeSettings::from_config(&self.config, &self.selected_model);
        // Detached; the task always ends with Done or Failed
        exchange::spawn(self.ollama.clone(), settings, turns, self.reply_tx.clone());

        true
    }

    /// Wait for the next event from the in-flight exchange or its timer
    pub async fn next_reply(&mut self) -> Option<ReplyEvent> {
        self.reply_rx.recv().await
    }

    pub fn apply_reply(&mut self, event: ReplyEvent) {
        let Some(idx) = self.pending_idx else {
            debug!(?event, "reply event with nothing pending");
            return;
        };

        match event {
            ReplyEvent::Fragment(text) => self.conversation.update_pending(idx, &text),
            ReplyEvent::StillWorking(id) if id != self.exchange_id => {
                debug!(id, current = self.exchange_id, "dropping notice from an earlier exchange");
            }
            ReplyEvent::StillWorking(_) => {
                let notice = self.config.notice_for(&self.selected_model);
                self.conversation.mark_still_working(idx, &notice);
            }
            ReplyEvent::Done(text) => {
                self.conversation.finish(idx, text);
                self.settle();
            }
            ReplyEvent::Failed(reason) => {
                self.conversation.fail(idx, &reason);
                self.settle();
            }
        }
    }

    fn settle(&mut self) {
        if let Some(timer) = self.notice_timer.take() {
            timer.abort();
        }
        self.pending_idx = None;
        self.loading = false;
        self.animation_frame = 0;
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.loading {
            self.animation_frame = (self.animation_frame + 1) % 2;
        }
    }

    pub fn max_scroll(&self) -> u16 {
        self.total_chat_lines.saturating_sub(self.chat_height)
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.follow_bottom = false;
        self.scroll = self.scroll.min(self.max_scroll()).saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.max_scroll();
        self.scroll = self.scroll.saturating_add(lines);
        if self.scroll >= max {
            self.scroll = max;
            self.follow_bottom = true;
        }
    }

    pub fn scroll_half_page_up(&mut self) {
        self.scroll_up((self.chat_height / 2).max(1));
    }

    pub fn scroll_half_page_down(&mut self) {
        self.scroll_down((self.chat_height / 2).max(1));
    }

    // Model picker methods
    pub async fn open_model_picker(&mut self) {
        match self.ollama.list_models().await {
            Ok(models) if models.is_empty() => {
                self.status = Some("No models found. Pull one with: ollama pull <model>".to_string());
            }
            Ok(models) => {
                let current_idx = models
                    .iter()
                    .position(|m| *m == self.selected_model)
                    .unwrap_or(0);
                self.available_models = models;
                self.model_picker_state.select(Some(current_idx));
                self.show_model_picker = true;
                self.status = None;
            }
            Err(e) => {
                self.status = Some(format!("Could not list models: {}", e));
            }
        }
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = self.available_models.len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn select_model(&mut self) {
        if let Some(i) = self.model_picker_state.selected() {
            if let Some(model) = self.available_models.get(i) {
                self.selected_model = model.clone();
                self.show_model_picker = false;
                info!(model = %self.selected_model, "model selected");
                if self.persist_choices {
                    if let Err(e) = Config::save_default_model(&self.selected_model) {
                        self.status = Some(format!("Could not save config: {}", e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseMode;
    use crate::message::{Message, Sender};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app_for(server: &MockServer) -> App {
        let mut config = Config::new();
        config.base_url = server.uri();
        App::new(config)
    }

    async fn drain(app: &mut App) {
        while app.loading {
            let event = tokio::time::timeout(Duration::from_secs(5), app.next_reply())
                .await
                .expect("reply timed out")
                .expect("channel closed");
            app.apply_reply(event);
        }
    }

    #[tokio::test]
    async fn test_successful_reply_adds_user_and_assistant() {
        let server = MockServer::start().await;
        let body = "{\"message\":{\"content\":\"Hi \"}}\n{\"message\":{\"content\":\"there\"}}\n{\"done\":true}\n";
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "gemma:7b",
                "messages": [{"role": "user", "content": "hello"}],
                "stream": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let mut app = app_for(&server);
        app.input = "hello".to_string();
        app.cursor = 5;
        assert!(app.submit());
        assert!(app.loading);
        assert!(app.input.is_empty());
        assert_eq!(app.cursor, 0);
        assert_eq!(app.conversation.messages()[1].sender, Sender::Pending);

        drain(&mut app).await;

        assert_eq!(
            app.conversation.messages(),
            &[
                Message::new("hello", Sender::User),
                Message::new("Hi there", Sender::Assistant),
            ]
        );
        assert!(app.pending_idx.is_none());
    }

    #[tokio::test]
    async fn test_single_shot_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"message":{"content":"whole"},"done":true}"#))
            .mount(&server)
            .await;

        let mut app = app_for(&server);
        app.config.response_mode = ResponseMode::Single;
        app.input = "hello".to_string();
        app.submit();
        drain(&mut app).await;

        assert_eq!(app.conversation.messages()[1], Message::new("whole", Sender::Assistant));
    }

    #[tokio::test]
    async fn test_failed_call_adds_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string(r#"{"error":"model crashed"}"#))
            .mount(&server)
            .await;

        let mut app = app_for(&server);
        app.input = "hello".to_string();
        app.submit();
        drain(&mut app).await;

        assert_eq!(app.conversation.len(), 2);
        assert_eq!(app.conversation.messages()[0].sender, Sender::User);
        assert_eq!(
            app.conversation.messages()[1],
            Message::new("ERROR: model crashed", Sender::Error)
        );
        assert!(!app.loading);
    }

    #[tokio::test]
    async fn test_submit_ignored_when_blank_or_loading() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"response\":\"ok\",\"done\":true}\n")
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut app = app_for(&server);
        app.input = "   ".to_string();
        assert!(!app.submit());
        assert!(app.conversation.is_empty());

        app.input = "first".to_string();
        assert!(app.submit());
        app.input = "second".to_string();
        assert!(!app.submit());
        assert_eq!(app.input, "second");

        drain(&mut app).await;
        assert_eq!(app.conversation.len(), 2);
    }

    #[tokio::test]
    async fn test_still_working_notice_while_waiting() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"response\":\"late\",\"done\":true}\n")
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let mut app = app_for(&server);
        app.config.notice_delay_ms = 20;
        app.input = "hello".to_string();
        app.submit();

        let event = app.next_reply().await.unwrap();
        assert_eq!(event, ReplyEvent::StillWorking(app.exchange_id));
        app.apply_reply(event);
        assert_eq!(
            app.conversation.messages()[1],
            Message::new("gemma:7b is processing your reply...", Sender::Pending)
        );

        drain(&mut app).await;
        assert_eq!(app.conversation.messages()[1], Message::new("late", Sender::Assistant));
    }

    #[tokio::test]
    async fn test_notice_from_earlier_exchange_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"response\":\"ok\",\"done\":true}\n")
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;

        let mut app = app_for(&server);
        app.input = "first".to_string();
        app.submit();
        drain(&mut app).await;
        let first_id = app.exchange_id;

        // The first timer fired just before settle() aborted it
        app.reply_tx.send(ReplyEvent::StillWorking(first_id)).unwrap();

        app.input = "second".to_string();
        app.submit();
        let event = app.next_reply().await.unwrap();
        assert_eq!(event, ReplyEvent::StillWorking(first_id));
        app.apply_reply(event);
        assert_eq!(app.conversation.messages()[3], Message::new("", Sender::Pending));

        drain(&mut app).await;
        assert_eq!(app.conversation.messages()[3], Message::new("ok", Sender::Assistant));
    }

    #[tokio::test]
    async fn test_history_forwarded_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "messages": [
                    {"role": "user", "content": "one"},
                    {"role": "assistant", "content": "ok"},
                    {"role": "user", "content": "two"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"response\":\"second\",\"done\":true}\n"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"response\":\"ok\",\"done\":true}\n"))
            .mount(&server)
            .await;

        let mut app = app_for(&server);
        app.config.include_history = true;
        app.input = "one".to_string();
        app.submit();
        drain(&mut app).await;
        app.input = "two".to_string();
        app.submit();
        drain(&mut app).await;

        assert_eq!(app.conversation.messages()[3], Message::new("second", Sender::Assistant));
    }

    #[test]
    fn test_scroll_clamps_and_follows() {
        let mut app = App::new(Config::new());
        app.total_chat_lines = 30;
        app.chat_height = 10;
        app.scroll = app.max_scroll();

        app.scroll_up(5);
        assert_eq!(app.scroll, 15);
        assert!(!app.follow_bottom);

        app.scroll_down(100);
        assert_eq!(app.scroll, 20);
        assert!(app.follow_bottom);
    }

    #[test]
    fn test_model_picker_navigation() {
        let mut app = App::new(Config::new());
        app.available_models = vec!["a".to_string(), "b".to_string()];
        app.model_picker_state.select(Some(0));
        app.show_model_picker = true;

        app.model_picker_nav_down();
        app.model_picker_nav_down();
        assert_eq!(app.model_picker_state.selected(), Some(1));
        app.select_model();
        assert_eq!(app.selected_model, "b");
        assert!(!app.show_model_picker);
    }
}
