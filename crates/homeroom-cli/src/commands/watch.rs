//! Live context on the wall clock.
//!
//! Commands are read one per line from stdin (`start`, `pause`, `reset`,
//! `skip [work|break]`, `quit`). Every event is printed as one JSON line.

use chrono::Utc;
use homeroom_core::signal::SignalDescriptor;
use homeroom_core::{run_context, Command, ContextId, Phase, SignalError, SignalPlayer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::{open_session, CliResult};

/// Rings the terminal bell for audible signals.
struct TerminalBell;

impl SignalPlayer for TerminalBell {
    fn play(&mut self, descriptor: &SignalDescriptor) -> Result<(), SignalError> {
        tracing::info!(signal = descriptor.signal.as_str(), "completion signal");
        if descriptor.is_audible() {
            eprint!("\x07");
        }
        Ok(())
    }
}

pub fn run(learner: Option<&str>) -> CliResult {
    let session = open_session(learner)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let ctx = session.hub.attach_with(
            &session.learner,
            ContextId::generate(),
            Box::new(TerminalBell),
            Utc::now(),
        );
        let (tx, rx) = mpsc::channel(16);
        let driver = run_context(ctx, rx, |event| match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to encode event"),
        });
        tokio::join!(read_commands(tx), driver);
    });
    Ok(())
}

async fn read_commands(tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        match parse_command(&line) {
            Ok(Some(command)) => {
                let quit = command == Command::Detach;
                if tx.send(command).await.is_err() || quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => eprintln!("error: {e}"),
        }
    }
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "pause" => Command::Pause,
        "reset" => Command::Reset,
        "skip" => match words.next() {
            Some(phase) => Command::Skip(phase.parse::<Phase>()?),
            None => Command::SkipNext,
        },
        "quit" | "exit" => Command::Detach,
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_commands() {
        assert_eq!(parse_command("start"), Ok(Some(Command::Start)));
        assert_eq!(parse_command("  Pause "), Ok(Some(Command::Pause)));
        assert_eq!(parse_command("quit"), Ok(Some(Command::Detach)));
        assert_eq!(parse_command(""), Ok(None));
    }

    #[test]
    fn skip_takes_an_optional_phase() {
        assert_eq!(parse_command("skip"), Ok(Some(Command::SkipNext)));
        assert_eq!(parse_command("skip break"), Ok(Some(Command::Skip(Phase::Break))));
        assert!(parse_command("skip lunch").is_err());
    }

    #[test]
    fn unknown_verbs_are_rejected() {
        assert!(parse_command("dance").is_err());
    }
}
