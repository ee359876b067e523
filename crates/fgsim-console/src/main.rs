use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use fgsim_console::{
    actions::{spawn_action, Action},
    app::App,
    session::{push_url, session_loop},
    state::ConsoleState,
    transport::{ActionClient, HttpActionClient},
    ui,
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{fs::OpenOptions, io, path::PathBuf, sync::Arc};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_HUB_URL: &str = "http://127.0.0.1:21021";

#[derive(Parser, Debug)]
#[command(name = "fgsim-console")]
struct Args {
    /// Hub base URL.
    #[arg(long, default_value = "")]
    hub: String,
    /// Viewer command for opening products; validated on startup.
    #[arg(long, default_value = "")]
    viewer: String,
    /// Whether the simulation configuration currently validates.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    config_valid: bool,
    /// Task name sent with start requests.
    #[arg(long)]
    task: Option<String>,
    #[arg(long, default_value = "")]
    log_file: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_file);

    let hub = resolve_hub(&args.hub);
    let client = Arc::new(HttpActionClient::new(&hub)?);
    let push = push_url(client.base_url()).context("invalid hub url")?;
    info!(event = "console_start", hub = %hub, push = %push);

    let (session_tx, mut session_rx) = mpsc::channel(256);
    tokio::spawn(session_loop(push, session_tx));
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

    let mut app = App::new(
        ConsoleState::new(client.base_url(), args.config_valid),
        args.task.clone(),
    );
    let initial = app.state.set_viewer(&args.viewer);
    dispatch(&client, &outcome_tx, initial);

    let mut terminal = setup_terminal()?;
    let result = run_app(
        &mut terminal,
        &mut app,
        &client,
        &outcome_tx,
        &mut session_rx,
        &mut outcome_rx,
    )
    .await;
    restore_terminal(&mut terminal)?;
    result
}

async fn run_app<C: ActionClient>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    client: &Arc<C>,
    outcome_tx: &mpsc::UnboundedSender<fgsim_console::actions::ActionOutcome>,
    session_rx: &mut mpsc::Receiver<fgsim_console::session::SessionEvent>,
    outcome_rx: &mut mpsc::UnboundedReceiver<fgsim_console::actions::ActionOutcome>,
) -> Result<()> {
    let mut events = EventStream::new();
    loop {
        app.clamp_selection();
        terminal.draw(|f| ui::render(f, app))?;

        let follow_ups = tokio::select! {
            Some(event) = session_rx.recv() => app.state.apply_session(event),
            Some(outcome) = outcome_rx.recv() => app.state.apply_outcome(outcome),
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => app.handle_key(key),
                Some(Ok(_)) => Vec::new(),
                Some(Err(err)) => return Err(err.into()),
                None => break,
            },
        };
        dispatch(client, outcome_tx, follow_ups);

        if app.should_quit() {
            break;
        }
    }
    Ok(())
}

fn dispatch<C: ActionClient>(
    client: &Arc<C>,
    outcome_tx: &mpsc::UnboundedSender<fgsim_console::actions::ActionOutcome>,
    actions: Vec<Action>,
) {
    for action in actions {
        spawn_action(client.clone(), action, outcome_tx.clone());
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn resolve_hub(hub_flag: &str) -> String {
    if !hub_flag.trim().is_empty() {
        return hub_flag.trim().to_string();
    }
    if let Ok(value) = std::env::var("FGSIM_HUB_URL") {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    DEFAULT_HUB_URL.to_string()
}

/// The terminal belongs to the UI, so logs go to a file or nowhere.
fn init_logging(log_file: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let path = if log_file.trim().is_empty() {
        std::env::var("FGSIM_CONSOLE_LOG").ok().map(PathBuf::from)
    } else {
        Some(PathBuf::from(log_file))
    };
    let file = path.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match file {
        Some(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::sink)
                .try_init();
        }
    }
}
