use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "homeroom-cli", version, about = "Homeroom focus timer CLI")]
struct Cli {
    /// Learner to act for (defaults to `learner_id` from the config file)
    #[arg(long, global = true)]
    learner: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// One-shot timer control against the stored session
    Timer {
        #[command(subcommand)]
        action: commands::timer::TimerAction,
    },
    /// Learner timer settings
    Settings {
        #[command(subcommand)]
        action: commands::settings::SettingsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Run a live context, reading commands from stdin and printing events
    Watch,
    /// Run several contexts against a virtual clock
    Simulate(commands::simulate::SimulateArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("HOMEROOM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let learner = cli.learner.as_deref();
    let result = match cli.command {
        Commands::Timer { action } => commands::timer::run(action, learner),
        Commands::Settings { action } => commands::settings::run(action, learner),
        Commands::Config { action } => commands::config::run(action),
        Commands::Watch => commands::watch::run(learner),
        Commands::Simulate(args) => commands::simulate::run(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
