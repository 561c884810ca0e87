use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod config;
mod exchange;
mod handler;
mod message;
mod ollama;
mod theme;
mod tui;
mod ui;

use app::App;
use config::{Config, ResponseMode, ThemeName};
use exchange::ExchangeSettings;
use message::ChatTurn;
use ollama::OllamaClient;
use tui::{AppEvent, EventHandler, Tui};

#[derive(Parser)]
#[command(name = "ollama-chat")]
#[command(version, about = "Chat with a local Ollama model from the terminal")]
struct Cli {
    /// Ollama server address
    #[arg(long, env = "OLLAMA_CHAT_HOST")]
    host: Option<String>,
    /// Model to chat with
    #[arg(short, long)]
    model: Option<String>,
    /// Read replies as a stream or as one object
    #[arg(long, value_enum)]
    mode: Option<ResponseMode>,
    /// Colour palette
    #[arg(long, value_enum)]
    theme: Option<ThemeName>,
    /// Check that the model is installed before each request
    #[arg(long)]
    probe: bool,
    /// Use /api/generate when /api/chat is unavailable
    #[arg(long)]
    fallback: bool,
    /// Send earlier turns along with each message
    #[arg(long)]
    history: bool,
    /// Verbose logging
    #[arg(long)]
    debug: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Send one message and print the reply
    Ask {
        /// Message text
        prompt: String,
    },
    /// List models installed on the server
    Models,
}

impl Cli {
    fn apply_to(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.base_url = host.clone();
        }
        if let Some(model) = &self.model {
            config.default_model = model.clone();
        }
        if let Some(mode) = self.mode {
            config.response_mode = mode;
        }
        if let Some(theme) = self.theme {
            config.theme = theme;
        }
        config.probe_models |= self.probe;
        config.fallback_generate |= self.fallback;
        config.include_history |= self.history;
    }
}

fn open_log_file(log_dir: &Path) -> Result<File> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Could not create {}", log_dir.display()))?;
    let path = log_dir.join("ollama-chat.log");
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Could not open {}", path.display()))
}

/// Log to a file; the terminal belongs to the UI
fn init_logging(debug: bool) -> Result<()> {
    let log_file = open_log_file(&Config::data_dir()?)?;

    let default_filter = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(log_file)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.debug) {
        eprintln!("Logging disabled: {:#}", e);
    }

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Ignoring unreadable config: {}", e);
        Config::new()
    });
    cli.apply_to(&mut config);
    info!(base_url = %config.base_url, model = %config.default_model, "starting");

    match &cli.command {
        None | Some(Commands::Chat) => run_chat(config).await,
        Some(Commands::Ask { prompt }) => ask(&config, prompt).await,
        Some(Commands::Models) => list_models(&config).await,
    }
}

async fn run_chat(config: Config) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut app = App::new(config);
    app.persist_choices = true;
    let mut events = EventHandler::new(tui::TICK_RATE);

    let result = run_loop(&mut terminal, &mut app, &mut events).await;
    tui::restore()?;
    result
}

enum Step {
    Input(Option<AppEvent>),
    Reply(Option<exchange::ReplyEvent>),
}

async fn run_loop(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        let step = tokio::select! {
            event = events.next() => Step::Input(event),
            reply = app.next_reply() => Step::Reply(reply),
        };

        match step {
            Step::Input(Some(event)) => handler::handle_event(app, event).await?,
            Step::Reply(Some(reply)) => app.apply_reply(reply),
            Step::Input(None) | Step::Reply(None) => break,
        }
    }
    Ok(())
}

async fn ask(config: &Config, prompt: &str) -> Result<()> {
    let client = OllamaClient::new(&config.base_url);
    let settings = ExchangeSettings::from_config(config, &config.default_model);
    let turns = [ChatTurn::user(prompt)];

    let mut printed = 0;
    let mut stdout = std::io::stdout();
    let result = exchange::exchange(&client, &settings, &turns, |text| {
        let _ = write!(stdout, "{}", &text[printed..]);
        let _ = stdout.flush();
        printed = text.len();
    })
    .await;

    match result {
        Ok(text) => {
            // Single-shot replies arrive without fragments
            println!("{}", &text[printed..]);
            Ok(())
        }
        Err(e) => {
            if printed > 0 {
                println!();
            }
            eprintln!("ERROR: {}", e);
            eprintln!("Make sure Ollama is running: ollama serve");
            Err(e.into())
        }
    }
}

async fn list_models(config: &Config) -> Result<()> {
    let client = OllamaClient::new(&config.base_url);

    match client.list_models().await {
        Ok(models) if models.is_empty() => {
            println!("No models found. Pull a model with: ollama pull {}", config.default_model);
        }
        Ok(models) => {
            for model in models {
                let marker = if model == config.default_model { "*" } else { " " };
                println!("{} {}", marker, model);
            }
        }
        Err(e) => {
            eprintln!("Error connecting to Ollama at {}: {}", client.base_url(), e);
            eprintln!("Make sure Ollama is running: ollama serve");
            return Err(e.into());
        }
    }

    Ok(())
}
