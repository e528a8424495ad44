use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use mcpilot_core::agent::{AgentEvent, AgentLoop, Conversation, PromptComposer, RunOutcome, SessionPool};
use mcpilot_core::{config, providers};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;
use tracing::{debug, info};

mod logging;
mod onboard;

/// Longest tool output echoed to the terminal; the model always gets all of it.
const TOOL_OUTPUT_PREVIEW: usize = 200;

#[derive(Parser)]
#[command(name = "mcpilot")]
#[command(about = "mcpilot - chat with a model that can call MCP tools", long_about = None)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive setup of ~/.mcpilot/config.toml
    Onboard,
    /// Chat interactively, or answer a single message and exit
    Chat {
        #[arg(short, long)]
        message: Option<String>,
    },
}

enum ReplCommand {
    Quit,
    History,
    Clear,
}

impl ReplCommand {
    fn parse(input: &str) -> Option<Self> {
        match input.to_lowercase().as_str() {
            "quit" | "exit" => Some(Self::Quit),
            "history" => Some(Self::History),
            "clear" => Some(Self::Clear),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let command = cli.command.unwrap_or_else(|| {
        if !config::config_exists() {
            Commands::Onboard
        } else {
            Commands::Chat { message: None }
        }
    });

    match command {
        Commands::Onboard => {
            let onboard_config = onboard::run_onboard().map_err(|e| {
                eprintln!("{} Onboarding failed: {}", style("✗").red(), e);
                anyhow::anyhow!("Onboarding failed: {}", e)
            })?;
            config::save_config(&onboard_config)?;
        }
        Commands::Chat { message } => chat(message).await?,
    }

    Ok(())
}

async fn chat(message: Option<String>) -> Result<()> {
    let config = config::load_config()?;
    let provider = providers::create_provider(&config)?;

    let mut pool = SessionPool::new().with_timeout(config.tool_timeout());
    for server in &config.servers {
        pool.register(server.clone());
    }

    let report = pool.connect_all().await;
    for failure in &report.failures {
        eprintln!(
            "{} Tool provider '{}' unavailable: {}",
            style("!").yellow(),
            failure.provider,
            failure.error
        );
    }
    info!(
        providers = report.connected,
        tools = pool.catalog().len(),
        "Tool providers connected"
    );

    let mut agent = AgentLoop::new(provider, PromptComposer::new(config.system_prompt.clone()), pool)
        .with_max_iterations(config.max_iterations)
        .with_max_history(config.max_history)
        .with_streaming(config.stream.enabled);

    let result = match message {
        Some(message) => {
            let mut conversation = Conversation::new();
            run_turn(&agent, &mut conversation, &message).await.map(|_| ())
        }
        None => repl(&agent).await,
    };

    agent.shutdown().await;
    result
}

async fn repl(agent: &AgentLoop) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    let history_path = config::get_mcpilot_dir().join("history.txt");
    if editor.load_history(&history_path).is_err() {
        debug!(path = %history_path.display(), "No readline history yet");
    }

    let tools = agent.pool().catalog().names();
    println!("{}", style("mcpilot").cyan().bold());
    if tools.is_empty() {
        println!("{}", style("No tools available.").dim());
    } else {
        println!("{} {}", style("Tools:").dim(), tools.join(", "));
    }
    println!(
        "{}",
        style("Commands: history, clear, quit. Ctrl+C cancels a running answer.").dim()
    );
    println!();

    let mut conversation = Conversation::new();

    loop {
        let line = tokio::task::block_in_place(|| editor.readline("> "));
        let input = match line {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(input);

        match ReplCommand::parse(input) {
            Some(ReplCommand::Quit) => break,
            Some(ReplCommand::History) => print_history(&conversation),
            Some(ReplCommand::Clear) => {
                conversation.clear();
                println!("{}", style("Conversation cleared.").dim());
            }
            None => {
                if let Err(e) = run_turn(agent, &mut conversation, input).await {
                    eprintln!("{} Error: {}", style("✗").red(), e);
                }
                println!();
            }
        }
    }

    if let Err(e) = editor.save_history(&history_path) {
        debug!(error = %e, "Could not save readline history");
    }
    println!("Goodbye!");
    Ok(())
}

/// Runs one message, printing progress as it happens. Ctrl+C abandons the
/// run and leaves the conversation as it was before the message.
async fn run_turn(
    agent: &AgentLoop,
    conversation: &mut Conversation,
    input: &str,
) -> Result<Option<RunOutcome>> {
    let mut printer = EventPrinter::default();
    let outcome = agent
        .run_until(
            conversation,
            input,
            |event| printer.handle(event),
            tokio::signal::ctrl_c(),
        )
        .await;
    printer.finish();

    if matches!(outcome, Ok(None)) {
        println!("{}", style("Cancelled.").yellow());
    }
    outcome
}

fn print_history(conversation: &Conversation) {
    if conversation.exchanges().is_empty() {
        println!("{}", style("No messages yet.").dim());
        return;
    }
    for (i, exchange) in conversation.exchanges().iter().enumerate() {
        println!("{} {}", style(format!("[{}] you:", i + 1)).cyan(), exchange.user);
        println!("{} {}", style("    assistant:").green(), exchange.assistant);
    }
}

#[derive(Default)]
struct EventPrinter {
    mid_line: bool,
}

impl EventPrinter {
    fn handle(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Token(token) => {
                print!("{}", token);
                let _ = std::io::stdout().flush();
                self.mid_line = !token.ends_with('\n');
            }
            AgentEvent::ToolCall {
                name,
                arguments,
                known,
            } => {
                self.finish();
                if known {
                    println!("{} {} {}", style("→").cyan(), style(&name).bold(), style(arguments).dim());
                } else {
                    println!("{} {} is not an available tool", style("!").yellow(), style(&name).bold());
                }
            }
            AgentEvent::ToolResult {
                name,
                is_error,
                output,
            } => {
                let marker = if is_error { style("✗").red() } else { style("✓").green() };
                println!("{} {}: {}", marker, name, style(preview(&output)).dim());
            }
            AgentEvent::IterationLimit { max } => {
                self.finish();
                println!(
                    "{} Stopped after {} model calls without a final answer.",
                    style("!").yellow(),
                    max
                );
            }
        }
    }

    fn finish(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}

fn preview(output: &str) -> String {
    let flat = output.replace('\n', " ");
    match flat.char_indices().nth(TOOL_OUTPUT_PREVIEW) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
