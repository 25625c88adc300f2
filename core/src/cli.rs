use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::interpreter::{load_program, ProgramError};
use crate::scheduler::{FiringOrder, PhaseKind};

#[derive(Parser)]
#[command(name = "phaser")]
#[command(about = "Phaser - run block programs with scheduled phase hooks", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log filter such as "debug" or "phaser_core=trace" (overrides config file and env vars)
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program and print its trace
    Run {
        /// Program file (.json or .toml)
        program: PathBuf,

        /// Maximum block nesting (overrides config)
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Validate a program without running it
    Check {
        /// Program file (.json or .toml)
        program: PathBuf,
    },

    /// List every phase kind with its firing order
    Phases,
}

/// One line of the `phases` listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRow {
    pub keyword: &'static str,
    pub tag: &'static str,
    pub order: FiringOrder,
    pub run_once: bool,
}

/// Block phases in firing order, then the rest in declaration order
pub fn phase_table() -> Vec<PhaseRow> {
    let block = PhaseKind::BLOCK_FIRING_ORDER.iter().copied();
    let rest = PhaseKind::ALL
        .iter()
        .copied()
        .filter(|kind| !PhaseKind::BLOCK_FIRING_ORDER.contains(kind));

    block
        .chain(rest)
        .map(|kind| PhaseRow {
            keyword: kind.keyword(),
            tag: kind.tag(),
            order: kind.firing_order(),
            run_once: kind.is_run_once(),
        })
        .collect()
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    use crate::init::InitBuilder;

    let mut builder = InitBuilder::new();
    if let Some(config_path) = &cli.config {
        builder = builder.config_path(config_path);
    }
    if let Some(filter) = &cli.log_filter {
        builder = builder.log_filter(filter);
    }
    if let Commands::Run {
        max_depth: Some(depth),
        ..
    } = &cli.command
    {
        builder = builder.max_block_depth(*depth);
    }

    // Eagerly load and validate configuration before executing any command
    let runtime = builder.init()?;

    match cli.command {
        Commands::Run { program, .. } => {
            let program = load_program(&program)?;
            let report = runtime.vm().run(&program)?;
            runtime.shutdown();

            for line in &report.trace {
                println!("{}", line);
            }
            match report.result {
                Ok(value) => println!("=> {}", value),
                Err(err) => {
                    eprintln!("Program '{}' failed: {}", program.name, err);
                    std::process::exit(1);
                }
            }
        }

        Commands::Check { program } => match load_program(&program) {
            Ok(program) => println!("✓ {} is valid", program.name),
            Err(ProgramError::Invalid(errors)) => {
                eprintln!("Found {} problem(s):", errors.len());
                for error in errors {
                    eprintln!("  {}", error);
                }
                std::process::exit(1);
            }
            Err(err) => return Err(err.into()),
        },

        Commands::Phases => {
            for row in phase_table() {
                let order = match row.order {
                    FiringOrder::Declaration => "declaration",
                    FiringOrder::Reverse => "reverse",
                };
                let once = if row.run_once { " (run once)" } else { "" };
                println!("  {:<13} | {:<14} | {}{}", row.keyword, row.tag, order, once);
            }
        }
    }

    Ok(())
}
