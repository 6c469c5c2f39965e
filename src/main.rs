use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use warden::config::Config;
use warden::sink::OutputSink;
use warden::{PlanOutcome, Session};

fn print_help() {
    println!(
        "\
warden v{}

Generates shell or Python code for a task, shows it for approval,
then runs it inside a persistent Docker sandbox.

USAGE:
    warden [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/warden.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    RUST_LOG                Log level filter for tracing
                            (e.g. debug, warden=debug,warn)
    PROVIDER                Force a provider: ollama, gemini, anthropic, openai
    GEMINI_API_KEY          API key for Google Gemini
    ANTHROPIC_API_KEY       API key for Anthropic Claude models
    OPENAI_API_KEY          API key for OpenAI
    OLLAMA_BASE_URL         Ollama endpoint [default: http://localhost:11434]
    OLLAMA_MODEL            Default Ollama model [default: llama3.2]
    OLLAMA_AGENT_MODEL      Ollama model for planning
    OLLAMA_CODEGEN_MODEL    Ollama model for code generation

COMMANDS (at the prompt):
    files    List files in the workspace
    status   Show provider health
    exit     Quit (also: quit, Ctrl-C)

EXAMPLES:
    warden                               # uses config/warden.toml
    PROVIDER=ollama warden               # local models only
    RUST_LOG=debug warden                # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

/// Prints each chunk as soon as it arrives.
fn print_chunk(chunk: &str) {
    print!("{chunk}");
    let _ = std::io::stdout().flush();
}

fn prompt(label: &str) {
    print!("{label}");
    let _ = std::io::stdout().flush();
}

/// Next input line, or `None` on EOF or Ctrl-C.
async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        _ = tokio::signal::ctrl_c() => {
            println!();
            info!("Shutdown signal received, exiting");
            Ok(None)
        }
    }
}

async fn handle_task(
    session: &mut Session,
    task: &str,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<bool> {
    let mut printer = print_chunk;
    let sink: &mut dyn OutputSink = &mut printer;
    let outcome = match session.plan(task, Some(sink)).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            // Backend errors are reported and the loop continues
            println!();
            error!("Planning failed: {e}");
            return Ok(true);
        }
    };
    println!();

    let request = match outcome {
        PlanOutcome::Answer(text) => {
            if text.trim().is_empty() {
                println!("(no response)");
            }
            return Ok(true);
        }
        PlanOutcome::Request(request) => request,
    };

    println!("\n{}", request.reasoning);
    for (i, block) in request.blocks.iter().enumerate() {
        println!("\n[{}] {}:\n{}", i + 1, block.language, block.text);
    }

    prompt("\nApprove execution? (y/n) ");
    let Some(answer) = read_line(lines).await? else {
        session.reject();
        return Ok(false);
    };

    if matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
        println!();
        let mut printer = print_chunk;
        let sink: &mut dyn OutputSink = &mut printer;
        match session.confirm(Some(sink)).await {
            Ok(report) => println!("\n{report}"),
            // The sandbox is gone (daemon down, image unresolvable): stop here
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => error!("Execution failed: {e}"),
        }
    } else {
        session.reject();
        println!("Execution cancelled.");
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("warden v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info")),
        )
        .init();

    println!(
        r#"
 __      __                 _
 \ \    / /_ _ _ _ __| |___ _ _
  \ \/\/ / _` | '_/ _` / -_) ' \
   \_/\_/\__,_|_| \__,_\___|_||_|
                              v{}
"#,
        env!("CARGO_PKG_VERSION")
    );

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/warden.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;
    info!(
        "Sandbox: {} ({}), workspace {}",
        config.sandbox.container_name,
        config.sandbox.image,
        config.sandbox.workspace.display()
    );

    let mut session = Session::start(config).await?;
    println!("{}", session.banner());
    println!("Type a task, or 'exit' to quit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt("warden> ");
        let Some(line) = read_line(&mut lines).await? else {
            break;
        };
        let task = line.trim();

        match task {
            "" => continue,
            "exit" | "quit" => break,
            "files" => match session.workspace_files().await {
                Ok(files) if files.is_empty() => println!("(workspace is empty)"),
                Ok(files) => files.iter().for_each(|f| println!("  {f}")),
                Err(e) => error!("Cannot list workspace: {e}"),
            },
            "status" => {
                let health = session.health().await;
                println!("{}", session.banner());
                if session.provider().kind.is_local() {
                    println!(
                        "reachable: {}, models: {}",
                        health.reachable,
                        health.models.join(", ")
                    );
                    let missing = session.missing_models().await;
                    if !missing.is_empty() {
                        println!("missing: {}", missing.join(", "));
                    }
                }
            }
            _ => {
                if !handle_task(&mut session, task, &mut lines).await? {
                    break;
                }
            }
        }
    }

    session.shutdown().await?;
    Ok(())
}
