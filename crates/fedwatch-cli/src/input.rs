use std::io::{self, BufRead};

use anyhow::{anyhow, bail, Result};
use tokio::sync::mpsc;

use fedwatch_common::Strategy;
use fedwatch_session::{StartParams, UserCommand};

pub const HELP: &str =
    "commands: start <framework> [rounds] [strategy] | stop | reset | refresh | clear | quit (or Ctrl-D)";

/// Parse one line typed during `watch`. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<UserCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let cmd = match verb.to_ascii_lowercase().as_str() {
        "start" => {
            let framework = words
                .next()
                .ok_or_else(|| anyhow!("usage: start <framework> [rounds] [strategy]"))?;
            let mut params = StartParams::new(framework);
            if let Some(rounds) = words.next() {
                params.num_rounds = Some(
                    rounds
                        .parse()
                        .map_err(|_| anyhow!("rounds must be a number, got '{rounds}'"))?,
                );
            }
            if let Some(strategy) = words.next() {
                params.strategy = strategy.parse::<Strategy>()?;
            }
            UserCommand::Start(params)
        }
        "stop" => UserCommand::Stop,
        "reset" => UserCommand::Reset,
        "refresh" | "r" => UserCommand::Refresh,
        "clear" | "clear-log" => UserCommand::ClearLog,
        "quit" | "exit" | "q" => UserCommand::Quit,
        other => bail!("unknown command '{other}'"),
    };
    Ok(Some(cmd))
}

/// Forward stdin commands to the session until EOF or `quit`. Runs on its
/// own thread since reads block.
pub fn read_commands(tx: mpsc::Sender<UserCommand>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error=%e, "failed to read stdin");
                break;
            }
        };
        match parse_command(&line) {
            Ok(Some(cmd)) => {
                let quit = cmd == UserCommand::Quit;
                if tx.blocking_send(cmd).is_err() || quit {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("✗ {e}");
                eprintln!("  {HELP}");
            }
        }
    }
    tracing::debug!("stdin closed, ending session");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let cmd = parse_command("start sklearn 5 FedAdam").unwrap().unwrap();
        let UserCommand::Start(params) = cmd else {
            panic!("expected start");
        };
        assert_eq!(params.framework.as_deref(), Some("sklearn"));
        assert_eq!(params.num_rounds, Some(5));
        assert_eq!(params.strategy.name(), "FedAdam");
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("  ").unwrap(), None);
        assert_eq!(parse_command("STOP").unwrap(), Some(UserCommand::Stop));
        assert_eq!(parse_command("clear").unwrap(), Some(UserCommand::ClearLog));
        assert_eq!(parse_command("q").unwrap(), Some(UserCommand::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("start").is_err());
        assert!(parse_command("start pytorch many").is_err());
        assert!(parse_command("start pytorch 3 fedsgd").is_err());
        assert!(parse_command("launch").is_err());
    }
}
