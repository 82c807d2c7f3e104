use clap::Parser;
use colored::*;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use regen_stream::cli::{follow_answer, parse_command, Args, Command};
use regen_stream::{AttemptOutcome, AttemptReport, HttpTransport, RegenError, SessionController};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let config = args.client_config()?;
    let transport = HttpTransport::new(&config)?;
    let session = SessionController::new(transport);

    println!(
        "{} {}",
        "regen-stream".bright_cyan().bold(),
        format!("→ {}", config.endpoint).dimmed()
    );
    println!("{}", "type a message, /regen, /clear or /quit; Ctrl-C stops an answer or exits".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "you:".bright_blue().bold());
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        let started = match parse_command(&line) {
            Command::Empty => continue,
            Command::Quit => break,
            Command::Unknown(cmd) => {
                eprintln!("{} {}", "unknown command:".bright_red(), cmd);
                continue;
            }
            Command::Clear => {
                session.clear()?;
                println!("{}", "[transcript cleared]".dimmed());
                continue;
            }
            Command::Send(text) => session.send(text),
            Command::Regenerate => session.regenerate_last().map(Some),
        };
        match started {
            Ok(Some(handle)) => {
                let mut printed = false;
                let report = follow_answer(&session, handle, tokio::signal::ctrl_c(), |suffix| {
                    if !printed {
                        print!("{} ", "assistant:".bright_green().bold());
                        printed = true;
                    }
                    print!("{}", suffix);
                    let _ = io::stdout().flush();
                })
                .await;
                if printed {
                    println!();
                }
                print_outcome(&report);
            }
            Ok(None) => {}
            Err(e @ RegenError::NoUserMessage) => eprintln!("{} {}", "nothing to regenerate:".bright_red(), e),
            Err(e) => eprintln!("{} {}", "error:".bright_red(), e),
        }
    }
    Ok(())
}

fn print_outcome(report: &AttemptReport) {
    match &report.outcome {
        AttemptOutcome::Completed => {}
        AttemptOutcome::Cancelled => println!("{}", "[stopped]".dimmed()),
        AttemptOutcome::Failed(e) => {
            eprintln!("{} {}", "failed to regenerate:".bright_red().bold(), e);
            eprintln!("{}", "type /regen to retry".dimmed());
        }
    }
}
