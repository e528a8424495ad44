use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password, Select};
use mcpilot_core::config::{Config, ServerSpec};

const BANNER: &str = r"
    -------------------------------------
               m c p i l o t
      chat with tools over the MCP wire
    -------------------------------------
";

struct ProviderChoice {
    label: &'static str,
    id: &'static str,
    base_url: Option<&'static str>,
    models: &'static [&'static str],
    needs_key: bool,
}

const PROVIDERS: &[ProviderChoice] = &[
    ProviderChoice {
        label: "OpenAI",
        id: "openai",
        base_url: None,
        models: &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini"],
        needs_key: true,
    },
    ProviderChoice {
        label: "DeepSeek",
        id: "deepseek",
        base_url: Some("https://api.deepseek.com"),
        models: &["deepseek-chat", "deepseek-reasoner"],
        needs_key: true,
    },
    ProviderChoice {
        label: "Ollama (local)",
        id: "ollama",
        base_url: Some("http://localhost:11434"),
        models: &["llama3.2", "qwen2.5", "mistral"],
        needs_key: false,
    },
    ProviderChoice {
        label: "Other OpenAI-compatible endpoint",
        id: "openai-compatible",
        base_url: None,
        models: &[],
        needs_key: true,
    },
];

fn print_step(step: usize, total: usize, title: &str) {
    println!();
    println!(
        "{}",
        style(format!("[{}/{}] {}", step, total, title))
            .cyan()
            .bold()
    );
    println!();
}

fn setup_provider() -> Result<&'static ProviderChoice> {
    let labels: Vec<&str> = PROVIDERS.iter().map(|p| p.label).collect();

    let selection = Select::new()
        .with_prompt("Select your model provider")
        .items(&labels)
        .default(0)
        .interact()
        .context("Failed to select provider")?;

    Ok(&PROVIDERS[selection])
}

fn setup_endpoint(choice: &ProviderChoice) -> Result<Option<String>> {
    let mut input = Input::<String>::new().with_prompt("API base URL");
    if let Some(default) = choice.base_url {
        input = input.default(default.to_string());
    }

    let base_url = input.interact_text().context("Failed to read base URL")?;
    let base_url = base_url.trim();
    Ok((!base_url.is_empty()).then(|| base_url.to_string()))
}

fn setup_api_key(choice: &ProviderChoice) -> Result<String> {
    if !choice.needs_key {
        return Ok(String::new());
    }

    let api_key: String = Password::new()
        .with_prompt(format!("Enter your {} API key", choice.label))
        .allow_empty_password(true)
        .interact()
        .context("Failed to read API key")?;

    if api_key.trim().is_empty() {
        println!(
            "  {} No key stored; set MCPILOT_API_KEY before chatting.",
            style("!").yellow()
        );
    }

    Ok(api_key.trim().to_string())
}

fn setup_model(choice: &ProviderChoice) -> Result<String> {
    if choice.models.is_empty() {
        let model: String = Input::new()
            .with_prompt("Model name")
            .interact_text()
            .context("Failed to read model name")?;
        return Ok(model.trim().to_string());
    }

    let selection = Select::new()
        .with_prompt("Select your model")
        .items(choice.models)
        .default(0)
        .interact()
        .context("Failed to select model")?;

    Ok(choice.models[selection].to_string())
}

/// Splits `command arg1 arg2` on whitespace. Quoting is not supported; edit
/// the config file for arguments containing spaces.
fn parse_command_line(line: &str) -> Option<(String, Vec<String>)> {
    let mut parts = line.split_whitespace().map(str::to_string);
    let command = parts.next()?;
    Some((command, parts.collect()))
}

fn setup_servers() -> Result<Vec<ServerSpec>> {
    let mut servers = Vec::new();

    loop {
        let prompt = if servers.is_empty() {
            "Add an MCP tool provider?"
        } else {
            "Add another MCP tool provider?"
        };
        let add = Confirm::new()
            .with_prompt(prompt)
            .default(servers.is_empty())
            .interact()
            .context("Failed to read answer")?;
        if !add {
            break;
        }

        let name: String = Input::new()
            .with_prompt("Provider name")
            .interact_text()
            .context("Failed to read provider name")?;
        let line: String = Input::new()
            .with_prompt("Command to launch it (e.g. mcpilot-weather)")
            .interact_text()
            .context("Failed to read command")?;

        match parse_command_line(&line) {
            Some((command, args)) => {
                servers.push(ServerSpec::new(name.trim(), command).with_args(args));
            }
            None => println!("  {} Empty command, skipped.", style("!").yellow()),
        }
    }

    Ok(servers)
}

pub fn run_onboard() -> Result<Config> {
    println!("{}", style(BANNER).cyan().bold());

    println!("  {}", style("Welcome to mcpilot!").white().bold());
    println!(
        "  {}",
        style("This wizard writes ~/.mcpilot/config.toml.").dim()
    );
    println!();

    print_step(1, 4, "Model Provider");
    let choice = setup_provider()?;
    let base_url = setup_endpoint(choice)?;

    print_step(2, 4, "Credentials");
    let api_key = setup_api_key(choice)?;

    print_step(3, 4, "Model Selection");
    let model = setup_model(choice)?;

    print_step(4, 4, "Tool Providers");
    let servers = setup_servers()?;

    let config = Config {
        provider: Some(choice.id.to_string()),
        api_key,
        base_url,
        model,
        servers,
        ..Default::default()
    };

    println!();
    println!("  {} Configuration complete!", style("✓").green().bold());
    println!(
        "  {} Config saved to {}",
        style("→").green(),
        style(mcpilot_core::config::get_config_path().display()).cyan()
    );
    if config.servers.is_empty() {
        println!(
            "  {} Add tool providers later under [[servers]] in the config file.",
            style("→").green()
        );
    }
    println!();
    println!(
        "  {} You can now run: {}",
        style("→").green(),
        style("mcpilot chat").cyan().bold()
    );
    println!();

    Ok(config)
}
