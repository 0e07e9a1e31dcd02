//! Terminal driver for the interview client.
//!
//! Plays each question aloud, records the answer with auto-stop, shows the
//! transcript, and waits for submit/redo/skip. Stdin commands map directly
//! to sequencer events; everything else is the library's state loop.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use hirevox::effects::{EffectRunner, InterviewEffectRunner, SessionBootstrap, StubEffectRunner};
use hirevox::session::StartRequest;
use hirevox::settings::load_settings;
use hirevox::state_machine::{Event, InterviewState, SequencerConfig};
use hirevox::{run_state_loop, snapshot, SequencerHandle, UiState};

#[derive(Default, Debug, Copy, Clone, clap::ValueEnum)]
enum Level {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<Level> for log::LevelFilter {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => log::LevelFilter::Error,
            Level::Warn => log::LevelFilter::Warn,
            Level::Info => log::LevelFilter::Info,
            Level::Debug => log::LevelFilter::Debug,
            Level::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Parser)]
#[command(name = "hirevox")]
#[command(about = "Voice client for AI-assisted interview sessions", long_about = None)]
struct Cli {
    /// Interview server base URL (overrides settings.json)
    #[arg(long, env = "HIREVOX_BASE_URL")]
    base_url: Option<String>,

    /// Candidate display name
    #[arg(long, default_value = "Candidate")]
    candidate: String,

    /// Job role the server generates questions for
    #[arg(long)]
    job_role: Option<String>,

    /// Job description the server generates questions from
    #[arg(long)]
    job_description: Option<String>,

    /// Number of questions to generate when none are given explicitly
    #[arg(long, default_value_t = 3)]
    num_questions: u32,

    /// Explicit question text (repeatable); skips server-side generation
    #[arg(long = "question")]
    questions: Vec<String>,

    /// Resume an existing session instead of starting a new one
    #[arg(long)]
    session_id: Option<String>,

    /// Voice for question synthesis (overrides settings.json)
    #[arg(long)]
    voice: Option<String>,

    /// Simulate the whole flow without a server or microphone
    #[arg(long)]
    simulate: bool,

    #[arg(short, long, default_value_t = Level::Info)]
    #[clap(value_enum)]
    level: Level,
}

fn init_logger(level: Level) {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} {} - {}",
                record.level(),
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.target(),
                record.args()
            )
        })
        .filter(None, level.into())
        .init();
}

fn render(state: &InterviewState) {
    let snap = snapshot(state);

    match &snap.state {
        UiState::Setup => println!("… loading interview"),
        UiState::QuestionReady {
            question_index,
            total_questions,
            question,
        } => {
            println!(
                "\nQuestion {}/{}: {}",
                question_index + 1,
                total_questions,
                question
            );
            println!("  [play] to hear it, [skip] to pass");
        }
        UiState::PlayingQuestion {
            question_index,
            question,
        } => println!("\n▶ Playing question {}: {}", question_index + 1, question),
        UiState::WaitingToRecord => println!("… get ready to answer"),
        UiState::Recording { .. } => {
            println!("● Recording. Pause when you're done, or type [stop] / [skip]")
        }
        UiState::Processing => println!("… transcribing your answer"),
        UiState::AwaitingDecision { transcript } => {
            println!("\nYour answer:\n  {}", transcript);
            println!("  [submit] to keep it, [redo] to answer again, [skip] to pass");
        }
        UiState::Submitting => println!("… submitting"),
        UiState::Skipping => println!("… skipping"),
        UiState::Completed {
            average_score,
            summary,
        } => {
            println!("\nInterview complete. Thank you!");
            if let Some(score) = average_score {
                println!("  Average score: {:.1}", score);
            }
            if let Some(summary) = summary {
                println!("  {}", summary);
            }
            println!("  [quit] to exit");
        }
    }

    if let Some(banner) = &snap.banner {
        let prefix = match banner.severity {
            "error" => "!!",
            "warning" => "!",
            _ => "i",
        };
        println!("[{}] {}", prefix, banner.message);
    }
}

fn parse_command(line: &str) -> Option<Event> {
    match line.trim().to_lowercase().as_str() {
        "play" | "p" => Some(Event::Play),
        "stop" | "s" => Some(Event::StopRequested),
        "submit" | "y" => Some(Event::Submit),
        "redo" | "r" => Some(Event::Redo),
        "skip" | "k" => Some(Event::Skip),
        "quit" | "q" | "exit" => Some(Event::Teardown),
        "" => None,
        other => {
            println!(
                "Unknown command {:?}. Commands: play, stop, submit, redo, skip, quit",
                other
            );
            None
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env if present (development convenience); production uses
    // real environment variables.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logger(cli.level);

    let mut settings = load_settings();
    if let Some(url) = &cli.base_url {
        settings.api.base_url = url.clone();
    }
    if let Some(voice) = &cli.voice {
        settings.api.voice = voice.clone();
    }

    let cfg = SequencerConfig::from(&settings);

    let bootstrap = match &cli.session_id {
        Some(session_id) => SessionBootstrap::Resume {
            session_id: session_id.clone(),
        },
        None => SessionBootstrap::Start(StartRequest {
            candidate_name: cli.candidate.clone(),
            job_role: cli.job_role.clone(),
            job_description: cli.job_description.clone(),
            num_questions: Some(cli.num_questions),
            questions: (!cli.questions.is_empty()).then(|| cli.questions.clone()),
        }),
    };

    let (tx, rx) = mpsc::channel::<Event>(32);

    // Level meter consumer: the terminal has no meter widget, so just keep
    // the channel drained and let debug logs show the levels.
    let (level_tx, mut level_rx) = mpsc::channel::<f32>(64);
    tokio::spawn(async move {
        let mut last_logged = std::time::Instant::now();
        while let Some(level) = level_rx.recv().await {
            if last_logged.elapsed() >= std::time::Duration::from_millis(500) {
                log::debug!("Input level: {:.2}", level);
                last_logged = std::time::Instant::now();
            }
        }
    });

    let runner: Arc<dyn EffectRunner> = if cli.simulate {
        log::info!("Running in simulation mode (no server, no microphone)");
        StubEffectRunner::new(vec![
            "Tell me about yourself.".to_string(),
            "Describe a project you are proud of.".to_string(),
            "Why do you want this role?".to_string(),
        ])
    } else {
        InterviewEffectRunner::new(settings, bootstrap, Some(level_tx))
    };

    let loop_tx = tx.clone();
    let state_loop = tokio::spawn(run_state_loop(rx, loop_tx, runner, cfg, render));

    let handle = SequencerHandle::new(tx);
    if handle.send(Event::Initialize).await.is_err() {
        eprintln!("State loop failed to start");
        return;
    }

    println!("Commands: play, stop, submit, redo, skip, quit");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(event) = parse_command(&line) {
                    let teardown = matches!(event, Event::Teardown);
                    if handle.send(event).await.is_err() {
                        break;
                    }
                    if teardown {
                        break;
                    }
                }
            }
            Ok(None) | Err(_) => {
                // Stdin closed; tear down cleanly.
                let _ = handle.send(Event::Teardown).await;
                break;
            }
        }
    }

    match state_loop.await {
        Ok(final_state) => {
            if final_state.is_completed() {
                log::info!("Interview finished");
            }
        }
        Err(e) => log::error!("State loop task failed: {}", e),
    }
}
