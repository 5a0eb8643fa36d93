use std::process::ExitCode;

use cyan_launcher::{
    command::LaunchPlan,
    config::LauncherConfig,
    error::{LaunchError, format_error_chain},
    logging,
    orchestrator::Orchestrator,
    speech::SpeechEngine,
};

const USAGE: &str = "usage: cyan-launcher [run]\n       cyan-launcher speak [--dry-run] <text>";

#[derive(Debug, PartialEq, Eq)]
enum Cli {
    Run,
    Speak { text: String, dry_run: bool },
    Help,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Cli, String> {
    match args.next().as_deref() {
        None | Some("run") => match args.next() {
            None => Ok(Cli::Run),
            Some(extra) => Err(format!("unexpected argument: {extra}")),
        },
        Some("speak") => {
            let mut dry_run = false;
            let mut words = Vec::new();
            for arg in args {
                if arg == "--dry-run" && words.is_empty() {
                    dry_run = true;
                } else {
                    words.push(arg);
                }
            }
            if words.is_empty() {
                return Err("speak needs some text".to_string());
            }
            Ok(Cli::Speak {
                text: words.join(" "),
                dry_run,
            })
        }
        Some("-h" | "--help" | "help") => Ok(Cli::Help),
        Some(other) => Err(format!("unknown command: {other}")),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(msg) => {
            eprintln!("{msg}\n{USAGE}");
            return ExitCode::from(2);
        }
    };
    if cli == Cli::Help {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    let config = match LauncherConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("cyan-launcher: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let _guards = match logging::init(config.log_file.as_deref()) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("cyan-launcher: logging init failed: {}", format_error_chain(&e));
            return ExitCode::FAILURE;
        }
    };

    match cli {
        Cli::Speak { text, dry_run } => speak(&config, &text, dry_run).await,
        _ => run(config).await,
    }
}

async fn run(config: LauncherConfig) -> ExitCode {
    let orchestrator = Orchestrator::new(config, LaunchPlan::npm());
    match orchestrator.run().await {
        Ok(summary) => {
            tracing::debug!(?summary, "run finished");
            ExitCode::from(summary.exit_code())
        }
        Err(e) => report(e),
    }
}

async fn speak(config: &LauncherConfig, text: &str, dry_run: bool) -> ExitCode {
    let engine = SpeechEngine::new(config.tts_engine.clone(), config.tts_voice.clone());
    if dry_run {
        println!("{}", engine.command_line(text));
        return ExitCode::SUCCESS;
    }
    match engine.speak(text).await {
        Ok(out) => {
            print!("{out}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %format_error_chain(&anyhow::Error::new(e)), "speak failed");
            ExitCode::FAILURE
        }
    }
}

fn report(err: LaunchError) -> ExitCode {
    let code = err.exit_code();
    let hint = err.hint();
    tracing::error!(error = %format_error_chain(&anyhow::Error::new(err)), "Cyan orchestrator failed");
    if let Some(hint) = hint {
        tracing::error!("{hint}");
    }
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn no_arguments_runs() {
        assert_eq!(parse_args(args(&[])), Ok(Cli::Run));
        assert_eq!(parse_args(args(&["run"])), Ok(Cli::Run));
    }

    #[test]
    fn speak_joins_words() {
        assert_eq!(
            parse_args(args(&["speak", "--dry-run", "hello", "\"world\""])),
            Ok(Cli::Speak {
                text: "hello \"world\"".to_string(),
                dry_run: true,
            })
        );
        assert!(parse_args(args(&["speak"])).is_err());
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(parse_args(args(&["serve"])).is_err());
        assert!(parse_args(args(&["run", "now"])).is_err());
    }
}
