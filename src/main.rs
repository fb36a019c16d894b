use clap::{Parser, Subcommand, ValueEnum};
use neurosignal_lib::chat::ChatExchange;
use neurosignal_lib::export::{self, DEFAULT_LINES_PER_PAGE};
use neurosignal_lib::session::LiveSession;
use neurosignal_lib::simulator::{MetricSource, RandomWalkSource, SignalHeuristicSource};
use neurosignal_lib::store::default_db_path;
use neurosignal_lib::user::User;
use neurosignal_lib::{self as app, AppState};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};

/// NeuroSignal session recorder and insight assistant
#[derive(Parser)]
#[command(name = "neurosignal")]
#[command(about = "Record simulated metric sessions and ask questions about them", long_about = None)]
#[command(version)]
struct Cli {
    /// Database path (defaults to ~/.neurosignal/neurosignal.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Email identifying the journal owner
    #[arg(long, global = true, default_value = "guest@neurosignal.local")]
    email: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a simulated live session
    Run {
        /// Seconds to record
        #[arg(long, default_value_t = 30)]
        seconds: u64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Ask a question about the session once it ends
        #[arg(long)]
        ask: Option<String>,
        #[arg(long, value_enum, default_value_t = SourceKind::Random)]
        source: SourceKind,
        /// JSON array of `{"volume", "movement"}` frames for the heuristic source
        #[arg(long, required_if_eq("source", "heuristic"))]
        frames: Option<PathBuf>,
    },

    /// List saved sessions
    Journal,

    /// Delete a saved session
    Delete { id: String },

    /// Write a session as CSV or a paginated text report
    Export {
        id: String,
        #[arg(long, conflicts_with = "report")]
        csv: bool,
        #[arg(long)]
        report: bool,
        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,
        #[arg(long, default_value_t = DEFAULT_LINES_PER_PAGE)]
        lines_per_page: usize,
    },

    /// Manage the backup provider key
    Key {
        #[command(subcommand)]
        action: KeyCommands,
    },

    /// List free backup models, or pick one
    Models {
        #[arg(long)]
        select: Option<String>,
    },

    /// Ask a question about a saved session
    Ask { id: String, question: String },

    /// Ask follow-up questions about a saved session, one per line
    Chat { id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    /// Simulated random walk
    Random,
    /// Replay coarse volume and movement frames
    Heuristic,
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Validate and store a key
    Set { key: String },
    /// Remove the stored key
    Clear,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let state = app::init_app(&db_path)?;
    let user = User::from_email(&cli.email, None);

    match cli.command {
        Commands::Run { seconds, title, notes, ask, source, frames } => {
            let source = metric_source(source, frames.as_deref())?;
            record_session(&state, &user, source, seconds, title, notes, ask).await
        }
        Commands::Journal => {
            let sessions = app::load_journal(&state, &user.id)?;
            if sessions.is_empty() {
                println!("No saved sessions for {}", user.email);
            }
            for s in sessions {
                println!(
                    "{}  {}  {:>4}s  anx {:>3}  stress {:>3}  conf {:>3}  {}",
                    s.id,
                    s.date,
                    s.duration,
                    s.averages.anxiety,
                    s.averages.stress,
                    s.averages.confidence,
                    s.title.unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::Delete { id } => {
            if app::delete_session(&state, &id)? {
                println!("Deleted {}", id);
            } else {
                println!("No session {}", id);
            }
            Ok(())
        }
        Commands::Export { id, csv, report, out, lines_per_page } => {
            let session = app::get_session(&state, &id)?;
            let (name, contents) = if csv || !report {
                (export::export_file_name(&session, "csv"), export::to_csv(&session))
            } else {
                let pages = export::render_report(&session, &user.name, lines_per_page);
                (export::export_file_name(&session, "txt"), pages.join("\n\x0c\n"))
            };
            let path = out.join(name);
            std::fs::write(&path, contents).map_err(|e| e.to_string())?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Commands::Key { action: KeyCommands::Set { key } } => {
            if app::validate_and_save_key(&state, &key).await? {
                println!("Key is valid and saved");
            } else {
                println!("Key was rejected");
            }
            Ok(())
        }
        Commands::Key { action: KeyCommands::Clear } => {
            app::remove_key(&state)?;
            println!("Key removed");
            Ok(())
        }
        Commands::Models { select: Some(model) } => {
            app::select_fallback_model(&state, &model)?;
            if model.trim().is_empty() {
                println!("Model selection cleared");
            } else {
                println!("Selected {}", model.trim());
            }
            Ok(())
        }
        Commands::Models { select: None } => {
            for m in app::list_free_models(&state).await? {
                println!("{}  ({})", m.id, m.name);
            }
            Ok(())
        }
        Commands::Ask { id, question } => {
            let pipeline = app::build_pipeline(&state)?;
            let response = app::ask_about_session(&state, &pipeline, &id, &question, &[]).await?;
            println!("[{}] {}", response.source.as_str(), response.text);
            Ok(())
        }
        Commands::Chat { id } => chat(&state, &id).await,
    }
}

fn metric_source(kind: SourceKind, frames: Option<&Path>) -> Result<Box<dyn MetricSource>, String> {
    match kind {
        SourceKind::Random => Ok(Box::new(RandomWalkSource::new())),
        SourceKind::Heuristic => {
            let path = frames.ok_or("--frames is required for the heuristic source")?;
            let json = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
            let source = SignalHeuristicSource::from_json(&json).map_err(|e| format!("{}: {}", path.display(), e))?;
            Ok(Box::new(source))
        }
    }
}

async fn chat(state: &AppState, id: &str) -> Result<(), String> {
    // unknown ids fail before the first prompt
    app::get_session(state, id)?;
    let pipeline = app::build_pipeline(state)?;
    let mut chat = ChatExchange::default();

    println!("Ask about session {}. /reset clears the history, an empty line exits.", id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.map_err(|e| e.to_string())? {
        let query = line.trim();
        match query {
            "" | "exit" => break,
            "/reset" => {
                chat.reset();
                println!("History cleared");
            }
            _ => {
                let response = app::chat_turn(state, &pipeline, &mut chat, id, query).await?;
                println!("[{}] {}", response.source.as_str(), response.text);
            }
        }
    }
    Ok(())
}

async fn record_session(
    state: &AppState,
    user: &User,
    source: Box<dyn MetricSource>,
    seconds: u64,
    title: Option<String>,
    notes: Option<String>,
    ask: Option<String>,
) -> Result<(), String> {
    let live = LiveSession::start(source);
    let mut reports = live.subscribe();
    let mut last_rule = "";

    while reports.changed().await.is_ok() {
        let Some(report) = reports.borrow_and_update().clone() else {
            continue;
        };
        if report.conclusion.rule != last_rule {
            println!("{:>4}s  {}", report.elapsed, report.conclusion.text);
            last_rule = report.conclusion.rule;
        }
        if let Some(snap) = &report.snapshot {
            println!("{:>4}s  snapshot: {}", report.elapsed, snap.trigger_type);
        }
        if report.elapsed >= seconds {
            break;
        }
    }

    let tracker = live.stop().await?;
    let session = tracker.finish(&user.id, title, notes);
    app::save_session(state, &session)?;
    println!("Saved session {} ({}s)", session.id, session.duration);

    if let Some(question) = ask {
        let pipeline = app::build_pipeline(state)?;
        let response = app::ask_about_session(state, &pipeline, &session.id, &question, &[]).await?;
        println!("[{}] {}", response.source.as_str(), response.text);
    }
    Ok(())
}
