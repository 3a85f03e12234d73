use quiz_client::api::{HttpQuizApi, QuizApi};
use quiz_client::cli::{self, Invocation, PromptCommand, PROMPT_HELP, USAGE};
use quiz_client::config::ClientConfig;
use quiz_client::dispatcher::SubmissionDispatcher;
use quiz_client::error::{ClientError, SessionError};
use quiz_client::models::{Answer, FlagRequest};
use quiz_client::open_attempt;
use quiz_client::session::{AttemptPhase, QuizSession, SubmitTrigger};
use quiz_client::storage::{FileStorage, SessionStorage};
use quiz_client::timer::{spawn_countdown, CountdownExit, CountdownHandle};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ClientConfig::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let Some(invocation) = Invocation::parse(std::env::args().skip(1)) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let api: Arc<dyn QuizApi> = Arc::new(HttpQuizApi::new(&config)?);
    match invocation {
        Invocation::Take { code } => take_quiz(&config, api, &code).await,
        Invocation::Leaderboard { quiz_id } => {
            let entries = api.leaderboard(&quiz_id).await?;
            print!("{}", cli::render_leaderboard(&entries));
            Ok(())
        }
        Invocation::Flag { quiz_id, question_id, reason } => {
            api.flag_question(FlagRequest { quiz_id, question_id, reason }).await?;
            println!("question flagged for review");
            Ok(())
        }
    }
}

async fn take_quiz(config: &ClientConfig, api: Arc<dyn QuizApi>, code: &str) -> anyhow::Result<()> {
    let storage: Arc<dyn SessionStorage> = Arc::new(FileStorage::new(&config.state_dir));
    let session = match open_attempt(api.as_ref(), storage, code).await {
        Ok(session) => session,
        Err(ClientError::Load(err)) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
        Err(err) => return Err(err.into()),
    };
    let quiz = session.quiz().clone();
    session.start()?;
    let dispatcher = SubmissionDispatcher::new(api);
    let mut countdown = spawn_countdown(session.clone(), dispatcher.clone());

    println!(
        "{} ({} questions, {} min){}",
        quiz.title,
        quiz.questions.len(),
        quiz.duration,
        if session.was_resumed() { " - resuming saved progress" } else { "" }
    );
    println!("{PROMPT_HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if let Some(view) = session.current_view() {
            if let Some(question) = quiz.question(&view.question_id) {
                print!("{}", cli::render_question(&view, question));
            }
        }

        let line = tokio::select! {
            exit = countdown.wait() => {
                report_countdown_exit(&session, exit);
                return Ok(());
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            if !settle_in_flight(&session, &mut countdown).await {
                println!("input closed, progress saved");
            }
            return Ok(());
        };
        let Some(command) = PromptCommand::parse(&line) else {
            println!("unrecognized input, `h` for help");
            continue;
        };

        let Some(view) = session.current_view() else {
            continue;
        };
        let outcome = match command {
            PromptCommand::Choose(n) => session
                .select_displayed_option(&view.question_id, n - 1)
                .map(|_| ()),
            PromptCommand::Text(text) => session.select_answer(&view.question_id, Answer::Text(text)),
            PromptCommand::Arrange(positions) => {
                let display: Vec<usize> = positions.iter().map(|p| p - 1).collect();
                session.arrange_blocks(&view.question_id, &display).map(|_| ())
            }
            PromptCommand::Next => session.next().map(|_| ()),
            PromptCommand::Previous => session.previous().map(|_| ()),
            PromptCommand::GoTo(n) => session.go_to(n - 1).map(|_| ()),
            PromptCommand::Help => {
                println!("{PROMPT_HELP}");
                Ok(())
            }
            PromptCommand::Quit => {
                if !settle_in_flight(&session, &mut countdown).await {
                    println!("progress saved, run `take {code}` to resume");
                }
                countdown.cancel();
                return Ok(());
            }
            PromptCommand::Submit => {
                match dispatcher.submit(&session, SubmitTrigger::User).await {
                    Ok(result) => {
                        print!("{}", cli::render_result(&result));
                        return Ok(());
                    }
                    Err(ClientError::Session(SessionError::Unanswered(missing))) => {
                        println!("answer every question before submitting ({} left)", missing.len());
                        Ok(())
                    }
                    Err(ClientError::Session(SessionError::AlreadyClaimed)) => {
                        println!("time is up, waiting for the automatic submission");
                        Ok(())
                    }
                    Err(err) if err.is_retryable() => {
                        eprintln!("submission failed: {err}; try `s` again");
                        Ok(())
                    }
                    Err(err) => {
                        eprintln!("submission rejected: {err}");
                        eprintln!("your progress is saved under {}", session.storage_key());
                        Ok(())
                    }
                }
            }
        };
        if let Err(err) = outcome {
            println!("{err}");
        }
    }
}

fn report_countdown_exit(session: &QuizSession, exit: Option<CountdownExit>) {
    match exit {
        Some(CountdownExit::Expired(Ok(result))) => {
            println!("\ntime is up, your answers were submitted");
            print!("{}", cli::render_result(&result));
        }
        Some(CountdownExit::Expired(Err(err))) => {
            eprintln!("\ntime is up but submitting failed: {err}");
            eprintln!("your progress is saved; run `take` again to retry");
        }
        Some(CountdownExit::Superseded) | Some(CountdownExit::Finalized) | None => {
            if let Some(result) = session.result() {
                print!("{}", cli::render_result(&result));
            }
        }
    }
}

/// Waits out a timeout submission that is already on the wire. Returns
/// whether there was one.
async fn settle_in_flight(session: &QuizSession, countdown: &mut CountdownHandle) -> bool {
    if session.phase() != AttemptPhase::Submitting {
        return false;
    }
    println!("time is up, waiting for the automatic submission to finish");
    report_countdown_exit(session, countdown.wait().await);
    true
}
