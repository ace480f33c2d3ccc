//! evolver CLI - drive an evolution session by hand
//!
//! The same loop the MCP server exposes, one subcommand per call:
//!
//! 1. `evolver start world_gen --output runs/` prints the first prompt
//! 2. answer the prompt, save the reply to a file
//! 3. `evolver step <state_id> reply.md` prints the next prompt or the result
//! 4. `evolver show <state_id>` summarizes the session so far
//!
//! Responses are JSON on stdout. Domain errors print `{error, kind, hint}`
//! and exit with status 2.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::{OwoColorize, Style};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use evolver::config::EvolverConfig;
use evolver::error::{ErrorResponse, EvolverError};
use evolver::orchestrator::Evolver;
use evolver::problems::{Problem, ProblemKind};
use evolver::store::Session;

/// Step-wise parameter evolution for game content
///
/// Examples:
///   evolver problems
///   evolver start crop_economy --output runs/
///   evolver step 6f1c... reply.md --max-iterations 20
///   cat reply.md | evolver step 6f1c... -
#[derive(Parser, Debug)]
#[command(name = "evolver")]
#[command(version)]
#[command(about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory to load evolver.toml / pyproject.toml from
    #[arg(short, long, default_value = ".", global = true)]
    pub root: PathBuf,

    /// Log progress to stderr (repeat for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a session and print the first prompt
    Start {
        /// Problem id (world_gen, crop_economy)
        problem: String,

        /// Where the final result.json is written
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Submit a reply to the last prompt
    Step {
        state_id: String,

        /// File holding the reply, or "-" for stdin
        response: PathBuf,

        /// Iteration cap (default from config)
        #[arg(short, long)]
        max_iterations: Option<u32>,
    },

    /// Summarize a session
    Show { state_id: String },

    /// List the registered problems
    Problems,

    /// List stored session ids
    Sessions,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = EvolverConfig::load(&cli.root)?;
    if cli.verbose > 0 {
        eprintln!("{}", config.display_summary());
    }

    match run(&cli, &config) {
        Ok(()) => Ok(()),
        Err(e) => {
            print_json(&e.response())?;
            std::process::exit(2);
        }
    }
}

/// Failures reported as `{error, kind, hint}`.
#[derive(Debug)]
enum CliError {
    Evolver(EvolverError),
    /// The reply file (or stdin) could not be read
    Input(anyhow::Error),
}

impl From<EvolverError> for CliError {
    fn from(err: EvolverError) -> Self {
        CliError::Evolver(err)
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Evolver(EvolverError::from(err))
    }
}

impl CliError {
    fn response(&self) -> ErrorResponse {
        match self {
            CliError::Evolver(e) => ErrorResponse::from(e),
            CliError::Input(e) => ErrorResponse {
                error: format!("{:#}", e),
                kind: "input_error",
                hint: "Check the reply file path, or pass - to read the reply from stdin".to_string(),
            },
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "evolver=warn",
        1 => "evolver=info",
        _ => "evolver=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, config: &EvolverConfig) -> Result<(), CliError> {
    match &cli.command {
        Command::Problems => {
            let evolver = Evolver::from_config(config)?;
            print_json(&evolver.problems())?;
        }
        Command::Sessions => {
            let evolver = Evolver::from_config(config)?;
            for id in evolver.list_sessions()? {
                println!("{}", id);
            }
        }
        Command::Start { problem, output } => {
            let evolver = Evolver::from_config(config)?;
            let response = evolver.start(problem, &output.to_string_lossy())?;
            print_json(&response)?;
        }
        Command::Step {
            state_id,
            response,
            max_iterations,
        } => {
            let text = read_response(response).map_err(CliError::Input)?;
            let evolver = Evolver::from_config(config)?;
            let outcome = evolver.step(state_id, &text, *max_iterations)?;
            print_json(&outcome)?;
        }
        Command::Show { state_id } => {
            let evolver = Evolver::from_config(config)?;
            let session = evolver.show(state_id)?;
            print!("{}", render_session(&session, !cli.no_color));
        }
    }
    Ok(())
}

fn read_response(path: &PathBuf) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read response from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read response file {}", path.display()))
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

fn paint(text: impl std::fmt::Display, style: Style, color: bool) -> String {
    if color {
        format!("{}", text.style(style))
    } else {
        text.to_string()
    }
}

/// Human-readable session summary with a score bar per iteration.
fn render_session(session: &Session, color: bool) -> String {
    let threshold = session
        .problem
        .parse::<ProblemKind>()
        .map(|k| k.problem().plan().viability_threshold)
        .ok();

    let mut out = String::new();
    out.push_str(&format!(
        "{} {}\n",
        paint("session", Style::new().bold(), color),
        session.state_id
    ));
    out.push_str(&format!("  problem    {}\n", session.problem));
    out.push_str(&format!("  iteration  {}\n", session.iteration));

    let best_style = match threshold {
        Some(t) if session.best_score > t => Style::new().green().bold(),
        Some(_) => Style::new().yellow().bold(),
        None => Style::new().bold(),
    };
    out.push_str(&format!(
        "  best       {}{}\n\n",
        paint(format!("{:.4}", session.best_score), best_style, color),
        threshold
            .map(|t| paint(format!(" (viable above {})", t), Style::new().dimmed(), color))
            .unwrap_or_default()
    ));

    for entry in &session.history {
        let width = (entry.score.clamp(0.0, 1.0) * 40.0).round() as usize;
        let bar = "█".repeat(width);
        let style = if entry.score >= session.best_score {
            Style::new().green()
        } else {
            Style::new().dimmed()
        };
        out.push_str(&format!(
            "  #{:<3} {:.4}  {}\n",
            entry.iteration,
            entry.score,
            paint(bar, style, color)
        ));
    }

    out.push('\n');
    out.push_str(&paint("best params", Style::new().bold(), color));
    out.push('\n');
    out.push_str(&session.best_params.to_pretty_json());
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use evolver::types::{HistoryEntry, ParameterSet};
    use serde_json::json;

    #[test]
    fn test_cli_parses_step_from_stdin() {
        let cli = Cli::parse_from(["evolver", "step", "abc", "-", "--max-iterations", "4"]);
        match cli.command {
            Command::Step {
                state_id,
                response,
                max_iterations,
            } => {
                assert_eq!(state_id, "abc");
                assert_eq!(response, PathBuf::from("-"));
                assert_eq!(max_iterations, Some(4));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_reply_file_is_input_error() {
        let err = read_response(&PathBuf::from("/nonexistent/reply.md")).map_err(CliError::Input).unwrap_err();
        let response = err.response();
        assert_eq!(response.kind, "input_error");
        assert!(response.error.contains("/nonexistent/reply.md"));
        assert!(response.hint.contains("reply file"));
    }

    #[test]
    fn test_render_session_plain() {
        let session = Session {
            state_id: "id-1".to_string(),
            problem: "world_gen".to_string(),
            iteration: 1,
            best_score: 0.9,
            best_params: ParameterSet::new(json!({"tree_frequency": 0.3})),
            history: vec![
                HistoryEntry { iteration: 0, score: 0.5 },
                HistoryEntry { iteration: 1, score: 0.9 },
            ],
        };
        let text = render_session(&session, false);
        assert!(text.contains("session id-1"));
        assert!(text.contains("0.9000 (viable above 0.85)"));
        assert!(text.contains(&format!("#1   0.9000  {}", "█".repeat(36))));
        assert!(text.contains("\"tree_frequency\": 0.3"));
        assert!(!text.contains('\u{1b}'));
    }
}
