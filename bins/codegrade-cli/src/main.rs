mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use codegrade_common::config::DEFAULT_SANDBOX_URL;
use codegrade_common::sandbox::SandboxClient;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "codegrade-cli")]
#[command(about = "codegrade CLI - Talk to the execution sandbox directly", long_about = None)]
struct Cli {
    /// Sandbox REST base URL
    #[arg(long, env = "SANDBOX_URL", default_value = DEFAULT_SANDBOX_URL)]
    sandbox_url: String,

    /// Request timeout in seconds
    #[arg(long, env = "SANDBOX_TIMEOUT_SECS", default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List languages the sandbox supports
    Languages,

    /// Stage a local file into the sandbox cache
    Stage {
        /// File id to stage under (e.g. systemmainh)
        #[arg(short, long)]
        id: String,

        /// Local file to upload
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Check whether a file id is staged
    Check {
        /// File id to look up
        #[arg(short, long)]
        id: String,
    },

    /// Submit a single run and print the raw result
    Run {
        /// Sandbox language id (e.g. cpp, python3)
        #[arg(short, long)]
        language: String,

        /// Main source file
        #[arg(short, long)]
        source: PathBuf,

        /// Name the sandbox should give the main source file
        #[arg(long)]
        source_filename: Option<String>,

        /// Staged file as ID:FILENAME, repeatable, order preserved
        #[arg(short, long = "file")]
        files: Vec<String>,

        /// Standard input for the run
        #[arg(long)]
        stdin: Option<PathBuf>,

        /// Execution time limit in seconds
        #[arg(long)]
        max_time: Option<u32>,

        /// Memory limit in kilobytes
        #[arg(long)]
        max_memory: Option<u64>,

        /// Compiler argument, repeatable
        #[arg(long = "compile-arg", allow_hyphen_values = true)]
        compile_args: Vec<String>,

        /// Linker argument, repeatable
        #[arg(long = "link-arg", allow_hyphen_values = true)]
        link_args: Vec<String>,

        /// Program argument, repeatable
        #[arg(long = "arg", allow_hyphen_values = true)]
        run_args: Vec<String>,

        /// Ask the sandbox to keep its workspace for inspection
        #[arg(long, default_value = "false")]
        debug: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let sandbox = SandboxClient::new(&cli.sandbox_url, Duration::from_secs(cli.timeout))?;

    match cli.command {
        Commands::Languages => {
            commands::list_languages(&sandbox).await?;
        }
        Commands::Stage { id, file } => {
            commands::stage_file(&sandbox, &id, &file).await?;
        }
        Commands::Check { id } => {
            commands::check_file(&sandbox, &id).await?;
        }
        Commands::Run {
            language,
            source,
            source_filename,
            files,
            stdin,
            max_time,
            max_memory,
            compile_args,
            link_args,
            run_args,
            debug,
        } => {
            let options = commands::RunOptions {
                language,
                source,
                source_filename,
                files,
                stdin,
                max_time,
                max_memory,
                compile_args,
                link_args,
                run_args,
                debug,
            };
            commands::run(&sandbox, options).await?;
        }
    }

    Ok(())
}
