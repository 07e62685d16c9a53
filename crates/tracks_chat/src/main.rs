mod logging;
mod render;
mod settings;

use crate::render::BlockPrinter;
use anyhow::{Context, Result};
use clap::Parser;
use rustyline::{error::ReadlineError, history::DefaultHistory, Config, Editor};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use tracks_stream::{
    ChatClient, ChatClientConfig, ChatSession, PlaybackState, Role, StreamOutcome, Turn,
};

/// Terminal client for the Tracks chat server
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Message to send; starts an interactive session when omitted
    message: Option<String>,

    /// Continue an existing server session
    #[arg(long)]
    session_id: Option<String>,

    /// Server base URL (overrides settings and TRACKS_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// API key sent as a bearer token (overrides settings and TRACKS_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Hours east of UTC for displayed timestamps
    #[arg(long, allow_negative_numbers = true)]
    utc_offset: Option<i32>,

    /// Enable verbose logging (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Record raw responses to a file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Play back recorded responses instead of contacting the server
    #[arg(long)]
    playback: Option<PathBuf>,

    /// Fast playback mode - ignore chunk timing when playing recordings
    #[arg(long)]
    fast_playback: bool,
}

type SharedPrinter = Arc<Mutex<BlockPrinter>>;

fn lock_printer(printer: &SharedPrinter) -> std::sync::MutexGuard<'_, BlockPrinter> {
    printer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn print_lines(lines: Vec<String>) {
    if lines.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    for line in lines {
        let _ = writeln!(stdout, "{line}\n");
    }
    let _ = stdout.flush();
}

fn build_session(args: &Args, settings: &settings::ChatSettings) -> Result<ChatSession> {
    let mut session = match &args.playback {
        Some(path) => {
            let state = PlaybackState::from_file(path, args.fast_playback)
                .with_context(|| format!("Failed to load recording {}", path.display()))?;
            info!(
                "Playing back {} recorded sessions from {}",
                state.session_count(),
                path.display()
            );
            ChatSession::playback(state)
        }
        None => ChatSession::new(ChatClient::new(ChatClientConfig {
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
        })),
    };

    if let Some(session_id) = &args.session_id {
        session = session.with_session_id(session_id.clone());
    }
    if let Some(path) = &args.record {
        info!("Recording responses to {}", path.display());
        session = session.with_recording(path.clone());
    }
    Ok(session)
}

/// Send one message, printing blocks as they finalize. Ctrl-C stops the reply.
async fn run_message(
    session: &ChatSession,
    printer: &SharedPrinter,
    message: String,
) -> Result<StreamOutcome> {
    lock_printer(printer).begin_turn();

    let handle = session.submit_message(message);
    let stop = handle.stop_handle();
    let wait = handle.wait();
    tokio::pin!(wait);

    let result = tokio::select! {
        result = &mut wait => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for Ctrl-C: {}", e);
            } else if stop.cancel() {
                info!("Cancelling request");
            }
            wait.await
        }
    };

    let tail = {
        let conversation = session.conversation();
        let state = conversation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state
            .last_turn()
            .filter(|turn| turn.role == Role::Assistant)
            .map(|turn| lock_printer(printer).take_remaining(turn))
    };
    if let Some(lines) = tail {
        print_lines(lines);
    }

    let outcome = result.context("Chat request failed")?;
    debug!("Request ended: {:?}", outcome);
    Ok(outcome)
}

async fn run_repl(session: &ChatSession, printer: &SharedPrinter) -> Result<()> {
    let config = Config::builder()
        .edit_mode(rustyline::EditMode::Emacs)
        .build();
    let mut editor: Editor<(), DefaultHistory> =
        Editor::with_config(config).context("Failed to create line editor")?;

    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("Failed to read input"),
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        match message {
            "/exit" | "/quit" => break,
            "/session" => {
                let conversation = session.conversation();
                let state = conversation
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                println!("{}", state.session_id().unwrap_or("(no session yet)"));
                continue;
            }
            _ => {}
        }
        let _ = editor.add_history_entry(message);

        // Failures end the turn, not the session
        if let Err(e) = run_message(session, printer, message.to_string()).await {
            eprintln!("Error: {e:#}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    let interactive = args.message.is_none();
    if interactive {
        let log_path = logging::setup_logging_for_repl(args.verbose);
        debug!("Logging to {}", log_path.display());
    } else {
        logging::setup_logging(args.verbose);
    }

    let mut settings = settings::load_settings().context("Failed to load settings")?;
    if let Some(base_url) = &args.base_url {
        settings.base_url = base_url.clone();
    }
    if let Some(api_key) = &args.api_key {
        settings.api_key = Some(api_key.clone());
    }
    if let Some(utc_offset) = args.utc_offset {
        settings.utc_offset = utc_offset;
    }

    let mut session = build_session(&args, &settings)?;
    let printer: SharedPrinter = Arc::new(Mutex::new(BlockPrinter::new(
        settings.utc_offset,
        io::stdout().is_terminal(),
    )));
    let callback_printer = printer.clone();
    session.on_turn_update(move |turn: &Turn| {
        let lines = lock_printer(&callback_printer).take_finalized(turn);
        print_lines(lines);
    });

    match args.message.clone() {
        Some(message) => {
            run_message(&session, &printer, message).await?;
        }
        None => run_repl(&session, &printer).await?,
    }

    Ok(())
}
