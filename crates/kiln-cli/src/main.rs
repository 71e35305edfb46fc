mod commands;

use clap::{Parser, Subcommand};
use commands::exit_code_for;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    version,
    about = "Compile container create configs into OCI runtime specifications"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate an OCI runtime spec from a create config.
    Generate {
        /// Path to the create config TOML file.
        config: PathBuf,
        /// Write the spec here instead of stdout (usually config.json).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// JSON file listing known containers, for container:<ref> namespaces.
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Validate as an update of an existing container.
        #[arg(long, default_value_t = false)]
        update: bool,
    },
    /// Check a create config against this host without writing a spec.
    Validate {
        /// Path to the create config TOML file.
        config: PathBuf,
        /// JSON file listing known containers, for container:<ref> namespaces.
        #[arg(long)]
        registry: Option<PathBuf>,
    },
    /// Show which resource controls this host supports.
    Probe,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe") || msg.contains("os error 32") {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KILN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Generate {
            config,
            output,
            registry,
            update,
        } => commands::generate::run(
            &config,
            output.as_deref(),
            registry.as_deref(),
            update,
            json_output,
        ),
        Commands::Validate { config, registry } => {
            commands::validate::run(&config, registry.as_deref(), json_output)
        }
        Commands::Probe => commands::probe::run(json_output),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
