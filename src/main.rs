use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use blueprint::broker::{BrokerConfig, InFlightEviction, RequestBroker};
use blueprint::constants;
use blueprint::gemini::{GeminiConfig, GeminiTransport};
use blueprint::generator::{file_tree, FileGenerator, GeneratorConfig};
use blueprint::planner::{render_plan, ProjectPlanner};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, env = "GEMINI_API_KEY", hide_env_values = true, help = "Gemini API key.")]
    api_key: Option<String>,

    #[arg(long, global = true, env = "GEMINI_MODEL", help = "Gemini model name.")]
    model: Option<String>,

    #[arg(long, global = true, env = "GEMINI_BASE_URL", help = "Base URL of the Gemini API.")]
    base_url: Option<String>,

    #[arg(long, global = true, env = "BLUEPRINT_PROJECTS_DIR", help = "Directory that receives generated projects.")]
    projects_dir: Option<PathBuf>,

    #[arg(long, global = true, default_value_t = constants::API_DELAY_MS, help = "Pause between generated files, in milliseconds.")]
    api_delay_ms: u64,

    #[arg(long, global = true, default_value_t = constants::MAX_ATTEMPTS, help = "Attempts per completion before giving up.")]
    max_attempts: u32,

    #[arg(
        long,
        global = true,
        env = "BLUEPRINT_DEBOUNCE_MS",
        help = "Forget in-flight requests after this many milliseconds instead of on completion."
    )]
    debounce_ms: Option<u64>,

    #[arg(long, global = true, help = "Forget in-flight requests after the default debounce window.")]
    debounce: bool,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Plan a project from a description and generate its files.
    Create {
        #[arg(required = true, num_args = 1.., help = "What to build, in plain language.")]
        description: Vec<String>,
        #[arg(long, short, help = "Skip the confirmation prompt.")]
        yes: bool,
    },
    /// Plan a project and print the plan without writing files.
    Plan {
        #[arg(required = true, num_args = 1.., help = "What to build, in plain language.")]
        description: Vec<String>,
        #[arg(long, help = "Print the plan as JSON.")]
        json: bool,
    },
    /// Ask the model a one-off question.
    Ask {
        #[arg(required = true, num_args = 1.., help = "The question to send.")]
        question: Vec<String>,
    },
}

impl Cli {
    fn gemini_config(&self) -> GeminiConfig {
        let defaults = GeminiConfig::default();
        GeminiConfig {
            api_key: self.api_key.clone().unwrap_or(defaults.api_key),
            model: self.model.clone().unwrap_or(defaults.model),
            base_url: self.base_url.clone().unwrap_or(defaults.base_url),
            ..defaults
        }
    }

    fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            max_attempts: self.max_attempts,
            eviction: match (self.debounce_ms, self.debounce) {
                (Some(ms), _) => InFlightEviction::AfterWindow(Duration::from_millis(ms)),
                (None, true) => InFlightEviction::debounce_window(),
                (None, false) => InFlightEviction::OnCompletion,
            },
            ..BrokerConfig::default()
        }
    }

    fn generator_config(&self) -> GeneratorConfig {
        let defaults = GeneratorConfig::default();
        GeneratorConfig {
            projects_dir: self.projects_dir.clone().unwrap_or(defaults.projects_dir),
            api_delay: Duration::from_millis(self.api_delay_ms),
        }
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} (y/n): ", question);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(answer.trim().to_lowercase().starts_with('y'))
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for environment variables like API keys)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,blueprint=debug); stdout stays for user output
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("blueprint starting with command: {:?}", cli.command);

    let gemini_config = cli.gemini_config();
    if !constants::api_key_looks_valid(&gemini_config.api_key) {
        warn!("GEMINI_API_KEY is missing or looks like a placeholder");
        eprintln!("Please set your GEMINI_API_KEY environment variable:");
        eprintln!("   export GEMINI_API_KEY=\"your-api-key-here\"");
    }

    let transport = GeminiTransport::new(gemini_config).context("Failed to build HTTP client")?;
    let broker = RequestBroker::new(transport, cli.broker_config());

    match &cli.command {
        Commands::Create { description, yes } => {
            let description = description.join(" ");
            println!("Creating: {}", description);

            let plan = ProjectPlanner::new(&broker).create_plan(&description).await;
            println!("{}", render_plan(&plan));

            if !*yes && !confirm("Do you want to proceed with this plan?")? {
                println!("Project creation cancelled");
                return Ok(());
            }

            let generator = FileGenerator::new(&broker, cli.generator_config())?;
            let report = generator
                .generate_project(&plan)
                .await
                .context("Project generation failed")?;

            println!("\nPROJECT CREATION COMPLETED");
            print!("{}", file_tree(&plan.file_structure));
            println!("Location: {}", report.project_path.display());
            println!("Open: {}", report.project_path.join("index.html").display());
            if !report.fallbacks.is_empty() {
                println!("Fallback content used for: {}", report.fallbacks.join(", "));
            }
            if !report.skipped.is_empty() {
                println!("Skipped unsafe entries: {}", report.skipped.join(", "));
            }
        }
        Commands::Plan { description, json } => {
            let description = description.join(" ");
            let plan = ProjectPlanner::new(&broker).create_plan(&description).await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("{}", render_plan(&plan));
            }
        }
        Commands::Ask { question } => {
            let question = question.join(" ");
            match broker.fetch_completion(&question).await {
                Ok(answer) => println!("{}", answer),
                Err(e) => {
                    eprintln!("Sorry, I could not process that request: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eviction_for(args: &[&str]) -> InFlightEviction {
        let mut argv = vec!["blueprint"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["ask", "hi"]);
        Cli::parse_from(argv).broker_config().eviction
    }

    #[test]
    fn test_eviction_flags() {
        assert_eq!(eviction_for(&[]), InFlightEviction::OnCompletion);
        assert_eq!(eviction_for(&["--debounce"]), InFlightEviction::debounce_window());
        assert_eq!(
            eviction_for(&["--debounce", "--debounce-ms", "250"]),
            InFlightEviction::AfterWindow(Duration::from_millis(250))
        );
    }
}
