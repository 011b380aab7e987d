//! Gasket CLI
//!
//! Usage:
//!   gasket --prompt "your prompt"              # Single streamed evaluation
//!   gasket --interactive                       # Prompt loop
//!   gasket --serve                             # HTTP + WebSocket API
//!   gasket --token EXECUTE_TRADE --entropy 0.01
//!   gasket --status | --reset
//!   gasket --offline --prompt "text"           # Echo source, no network

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use futures_util::StreamExt;
use tracing_subscriber::prelude::*;

use gasket::core::{run_server, Gasket};
use gasket::types::{Evaluation, StreamEvent};
use gasket::{GasketConfig, GasketResult, VERSION};

#[derive(Parser, Debug)]
#[command(
    name = "gasket",
    version = VERSION,
    about = "Streaming semantic-variance interdiction gasket",
    long_about = "Gasket sits between a text generator and its consumer.\n\n\
                  Output is held back a few fragments at a time and compared\n\
                  against alternate continuations. Windows that drift are\n\
                  replaced by [REDACTED]; severe drift locks the system.\n\n\
                  Modes:\n  \
                  --prompt       Single streamed evaluation\n  \
                  --interactive  Prompt loop\n  \
                  --serve        HTTP + WebSocket API server\n  \
                  --token        Request a clearance token\n\n\
                  States:\n  \
                  OPEN     - Health within tolerance\n  \
                  DEGRADED - Health below crystallization threshold\n  \
                  LOCKED   - Severe breach, operator reset required"
)]
struct Args {
    /// Prompt to generate and interdict
    #[arg(short, long)]
    prompt: Option<String>,

    /// Interactive mode - one prompt per line from stdin
    #[arg(short, long)]
    interactive: bool,

    /// Run as HTTP API server
    #[arg(short, long)]
    serve: bool,

    /// Server address (default: 127.0.0.1:3000)
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// Print gate status and exit
    #[arg(long)]
    status: bool,

    /// Operator reset: clear the lockout record
    #[arg(long)]
    reset: bool,

    /// Request a clearance token for this intent
    #[arg(long, value_name = "INTENT")]
    token: Option<String>,

    /// Kinetic entropy reported with --token
    #[arg(long, default_value_t = 0.0)]
    entropy: f64,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the echo source instead of live backends
    #[arg(long)]
    offline: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Disable colors in output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gasket=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if args.no_color {
        colored::control::set_override(false);
    }

    let gasket = match build(&args) {
        Ok(gasket) => Arc::new(gasket),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(2);
        }
    };

    if args.serve {
        run_serve(&args, gasket).await;
    } else if args.status {
        print_status(&gasket, &args);
    } else if args.reset {
        run_reset(&gasket, &args);
    } else if let Some(ref intent) = args.token {
        run_token(&gasket, intent, &args);
    } else if let Some(ref prompt) = args.prompt {
        run_single(&gasket, prompt, &args).await;
    } else {
        // Default to interactive if no mode specified
        run_interactive(&gasket, &args).await;
    }
}

fn build(args: &Args) -> GasketResult<Gasket> {
    let config = match &args.config {
        Some(path) => GasketConfig::load(path)?,
        None => GasketConfig::default(),
    }
    .apply_env();

    if args.offline {
        Gasket::offline(config)
    } else {
        Gasket::from_config(config)
    }
}

/// Run single prompt evaluation
async fn run_single(gasket: &Gasket, prompt: &str, args: &Args) {
    let evaluation = stream_prompt(gasket, prompt, args).await;
    if !args.json && !evaluation.final_status.ran_to_completion() {
        std::process::exit(1);
    }
}

/// Run interactive mode
async fn run_interactive(gasket: &Gasket, args: &Args) {
    print_header("Interactive", args.no_color);
    println!("Type a prompt and press Enter. Type 'quit' to exit.");
    println!();

    let stdin = io::stdin();
    loop {
        let state = gasket.status().state;
        print!("{} [{}] > ", state.emoji(), state);
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let line = line.trim();
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("status") {
            print_status(gasket, args);
            continue;
        }

        stream_prompt(gasket, line, args).await;
        println!();
    }
    println!("\nSession ended. {}", gasket.status().to_terminal_string());
}

/// Print events as they arrive; return the collected evaluation
async fn stream_prompt(gasket: &Gasket, prompt: &str, args: &Args) -> Evaluation {
    let mut events = gasket.stream(prompt).await;
    let mut seen = Vec::new();

    while let Some(event) = events.next().await {
        if !args.json {
            print_event(&event);
        }
        seen.push(event);
    }

    let evaluation = Evaluation::from_events(seen);
    if args.json {
        match serde_json::to_string_pretty(&evaluation) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
        }
    } else {
        println!();
        let s = &evaluation.summary;
        let line = format!(
            "status={} | released={} | redactions={} | evaluations={} | peak_v={:.4}",
            evaluation.final_status, s.released, s.redactions, s.evaluations, s.peak_variance
        );
        if evaluation.final_status.ran_to_completion() && s.redactions == 0 {
            println!("{}", line.green());
        } else if evaluation.final_status.ran_to_completion() {
            println!("{}", line.yellow());
        } else {
            println!("{}", line.red());
        }
    }
    evaluation
}

fn print_event(event: &StreamEvent) {
    match event {
        StreamEvent::Fragment(text) => print!("{}", text),
        StreamEvent::Redacted | StreamEvent::Fallback => {
            print!("{}", event.display_text().unwrap_or_default().yellow().bold())
        }
        StreamEvent::Locked => print!("{}", event.display_text().unwrap_or_default().red().bold()),
        StreamEvent::Finished(_) => {}
    }
    let _ = io::stdout().flush();
}

fn print_status(gasket: &Gasket, args: &Args) {
    let status = gasket.status();
    if args.json {
        match serde_json::to_string_pretty(&status) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
        }
    } else if args.no_color {
        println!(
            "state={} | health={:.4} | tokens={}",
            status.state, status.health_index, status.tokens_issued
        );
        if let Some(record) = &status.lockout {
            println!("  lockout: {} (since {})", record.reason, record.timestamp.to_rfc3339());
        }
    } else {
        println!("{}", status.to_terminal_string());
    }
}

fn run_reset(gasket: &Gasket, args: &Args) {
    if let Err(e) = gasket.reset() {
        eprintln!("{} {}", "reset failed:".red().bold(), e);
        std::process::exit(1);
    }
    println!("{}", "Lockout cleared.".green());
    print_status(gasket, args);
}

fn run_token(gasket: &Gasket, intent: &str, args: &Args) {
    let result = gasket.issue_token(intent, args.entropy);
    let token_hex = result.token.as_ref().map(|t| t.to_hex());

    if args.json {
        let json = serde_json::json!({
            "granted": result.is_granted(),
            "reason": result.reason.code(),
            "description": result.reason.description(),
            "token_hex": token_hex,
        });
        println!("{}", json);
    } else if let Some(hex) = token_hex {
        println!("{} {}", "●".green(), result.reason.code().bold());
        println!("{}", hex);
    } else {
        println!("{} {} - {}", "●".red(), result.reason.code().bold(), result.reason.description());
    }

    if !result.is_granted() {
        std::process::exit(1);
    }
}

fn print_header(mode: &str, no_color: bool) {
    let title = format!("  Gasket v{} - {}", VERSION, mode);
    println!("========================================");
    if no_color {
        println!("{}", title);
    } else {
        println!("{}", title.bold().cyan());
    }
    println!("========================================");
    println!();
}

async fn run_serve(args: &Args, gasket: Arc<Gasket>) {
    print_header("API Server", args.no_color);
    println!("{}", gasket.status().to_terminal_string());
    println!();

    if let Err(e) = run_server(&args.addr, gasket).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
