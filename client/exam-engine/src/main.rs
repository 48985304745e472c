use anyhow::{bail, Context};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exam_engine::config::{EngineConfig, LogFormat};
use exam_engine::metrics::render_metrics;
use exam_engine::models::{Answer, OptionId, QuestionId, SessionEvent, SessionOutcome};
use exam_engine::services::{MemoryBackend, RedisBackend, SnapshotBackend};
use exam_engine::{
    DurableStore, Entry, ExamSession, HttpRemoteAuthority, RemoteAuthority, SessionEntry,
    SessionError, SubmitResult,
};

const USAGE: &str = "usage: exam-engine <exam-id> [attempt-id]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::load().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    let mut args = std::env::args().skip(1);
    let Some(exam_id) = args.next() else {
        bail!(USAGE);
    };
    let entry = match args.next() {
        Some(attempt_id) => SessionEntry::attempt(exam_id, attempt_id),
        None => SessionEntry::exam(exam_id),
    };

    tracing::info!(api_url = %config.api_url, "Starting exam engine");

    let remote: Arc<dyn RemoteAuthority> = Arc::new(
        HttpRemoteAuthority::new(&config.api_url, config.request_timeout)
            .context("Invalid attempt service URL")?,
    );

    let backend: Arc<dyn SnapshotBackend> = match &config.redis_uri {
        Some(uri) => Arc::new(
            RedisBackend::connect(uri)
                .await
                .context("Failed to connect to Redis")?,
        ),
        None => {
            tracing::warn!("REDIS_URI not set, snapshots will not survive a restart");
            Arc::new(MemoryBackend::new())
        }
    };
    let store = DurableStore::new(backend, config.settings.snapshot_max_age);

    let session = match ExamSession::enter(entry, Arc::clone(&remote), store, config.settings).await {
        Ok(Entry::Exam(session)) => session,
        Ok(Entry::Result(outcome)) => {
            show_outcome(remote.as_ref(), &outcome).await;
            return Ok(());
        }
        Err(SessionError::ExamUnavailable(exam_id)) => {
            println!("Exam {} is not available right now.", exam_id);
            return Ok(());
        }
        Err(e) => return Err(e).context("Could not enter exam"),
    };

    print_status(&session);
    run(&session, remote.as_ref()).await?;
    session.leave();
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "exam_engine=debug".into());

    // Logs go to stderr so stdout stays readable for the candidate.
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(session: &ExamSession, remote: &dyn RemoteAuthority) -> anyhow::Result<()> {
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    tracing::trace!(event = %event.to_json(), "{}", event.event_name());
                    match event {
                        SessionEvent::TimerTick(tick) => {
                            if tick.remaining_seconds % 60 == 0 || tick.remaining_seconds <= 10 {
                                println!("{} remaining", format_remaining(tick.remaining_seconds));
                            }
                        }
                        SessionEvent::TimeExpired(_) => println!("Time is up, submitting..."),
                        SessionEvent::Notice(notice) => println!("! {}", notice.message),
                        SessionEvent::Routed(outcome) => {
                            show_outcome(remote, &outcome).await;
                            return Ok(());
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Dropped {} session events", skipped);
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    return Ok(());
                };
                match handle_command(session, line.trim()).await {
                    Ok(Command::Continue) => {}
                    Ok(Command::Quit) => return Ok(()),
                    Ok(Command::Finished(outcome)) => {
                        show_outcome(remote, &outcome).await;
                        return Ok(());
                    }
                    Err(e) if e.is_retryable() => println!("! {} (try `submit` again)", e),
                    Err(e) => println!("! {}", e),
                }
            }
        }
    }
}

enum Command {
    Continue,
    Quit,
    Finished(SessionOutcome),
}

async fn handle_command(session: &ExamSession, line: &str) -> Result<Command, SessionError> {
    let mut parts = line.splitn(3, ' ');
    let verb = parts.next().unwrap_or_default();
    let first = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();

    match verb {
        "" => {}
        "answer" => {
            session.set_answer(QuestionId::from(first), Answer::single(rest))?;
        }
        "toggle" => {
            session.toggle_option(&QuestionId::from(first), OptionId::from(rest))?;
        }
        "text" => {
            session.set_answer(QuestionId::from(first), Answer::text(rest))?;
        }
        "goto" => match first.parse::<usize>() {
            Ok(number) if number > 0 => session.go_to_question(number - 1)?,
            _ => println!("goto expects a question number starting at 1"),
        },
        "status" => print_status(session),
        "submit" => match session.submit().await? {
            SubmitResult::Finished(outcome) => return Ok(Command::Finished(outcome)),
            SubmitResult::Ignored => println!("Submission already in progress"),
        },
        "metrics" => match render_metrics() {
            Ok(text) => print!("{}", text),
            Err(e) => tracing::warn!("Failed to render metrics: {}", e),
        },
        "quit" => return Ok(Command::Quit),
        other => println!(
            "unknown command {:?}; try answer, toggle, text, goto, status, submit, metrics or quit",
            other
        ),
    }
    Ok(Command::Continue)
}

fn print_status(session: &ExamSession) {
    let questions = session.questions();
    println!(
        "attempt {} | question {}/{} | {} answered | {} remaining",
        session.attempt_id(),
        session.current_question_index() + 1,
        questions.len(),
        session.answered_count(),
        format_remaining(session.remaining_seconds()),
    );
}

async fn show_outcome(remote: &dyn RemoteAuthority, outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::ViewResult { .. } => println!("Submitted."),
        SessionOutcome::AlreadyFinalized { .. } => println!("This attempt was already submitted."),
        SessionOutcome::PreviousAttemptExpired { .. } => {
            println!("Your previous attempt expired and was submitted automatically.")
        }
        SessionOutcome::Closed => {
            println!("This attempt is closed.");
            return;
        }
    }

    let Some(result_id) = outcome.result_id() else {
        return;
    };
    match remote.fetch_result(result_id).await {
        Ok(result) => println!("Score: {}/{}", result.score, result.max_score),
        Err(e) => {
            tracing::warn!(result_id = %result_id, "Could not load result: {}", e);
            println!("Result {} is not ready yet.", result_id);
        }
    }
}

fn format_remaining(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
