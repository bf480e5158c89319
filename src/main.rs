use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use mcptest::client::TestClient;
use mcptest::config::{load_config, ConfigError};
use mcptest::runner::{find_test_files, TestRunner};
use mcptest::trace::init_tracing;

#[derive(Parser)]
#[command(name = "mcptest")]
#[command(about = "Test harness for MCP servers, driven by a tool-using LLM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every *.test.yaml file in a directory against the configured servers
    Run {
        /// Path to the config file
        #[arg(short, long, default_value = "mcp.config.json")]
        config: PathBuf,

        /// Directory containing *.test.yaml files
        #[arg(short, long, default_value = "tests")]
        tests_dir: PathBuf,

        /// Enable debug-level tracing of LLM and MCP traffic
        #[arg(long)]
        trace: bool,
    },

    /// Interactive chat against the configured servers (no assertions)
    Chat {
        /// Path to the config file
        #[arg(short, long, default_value = "mcp.config.json")]
        config: PathBuf,

        /// Enable debug-level tracing of LLM and MCP traffic
        #[arg(long)]
        trace: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config, tests_dir, trace } => {
            init_tracing(trace);
            run_suite(&config, &tests_dir).await
        }
        Commands::Chat { config, trace } => {
            init_tracing(trace);
            run_chat(&config).await
        }
    };

    match result {
        Ok(all_passed) => {
            if all_passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("Fatal error: {e:#}");
            if e.downcast_ref::<ConfigError>()
                .is_some_and(|c| matches!(c, ConfigError::NotFound(_)))
            {
                eprintln!("Hint: create an mcp.config.json or pass --config <path>");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run_suite(config_path: &Path, tests_dir: &Path) -> anyhow::Result<bool> {
    let config = load_config(config_path)?;
    let files = find_test_files(tests_dir)?;
    if files.is_empty() {
        println!("No *.test.yaml files found in {}", tests_dir.display());
        return Ok(true);
    }

    let mut client = TestClient::new(config);
    if let Err(e) = client.connect().await {
        // Close any servers that did come up before the failure.
        client.disconnect().await;
        return Err(e);
    }

    let results = TestRunner::new(&mut client).run_all(&files).await;
    client.disconnect().await;

    Ok(results.iter().all(|r| r.passed))
}

async fn run_chat(config_path: &Path) -> anyhow::Result<bool> {
    let config = load_config(config_path)?;
    let mut client = TestClient::new(config);
    if let Err(e) = client.connect().await {
        client.disconnect().await;
        return Err(e);
    }

    println!("Chat mode. Type a message, or 'quit' to exit.");
    println!("{}", "─".repeat(40));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }

        match client.prompt(line).await {
            Ok(response) => {
                for call in &response.tool_calls {
                    println!(
                        "  \x1b[2m[{}/{}]\x1b[0m",
                        call.server_name, call.original_tool_name
                    );
                }
                println!("{}", response.text);
            }
            Err(e) => eprintln!("\x1b[31mError: {e:#}\x1b[0m"),
        }
    }

    client.disconnect().await;
    Ok(true)
}
