// CLI commands for poking at the sandbox
use anyhow::{bail, Context, Result};
use codegrade_common::builder::build_run_spec;
use codegrade_common::sandbox::SandboxClient;
use codegrade_common::types::{is_valid_identifier, FileRef, ResourceLimits, RunSpec, SandboxStatus};
use std::fs;
use std::path::{Path, PathBuf};

pub struct RunOptions {
    pub language: String,
    pub source: PathBuf,
    pub source_filename: Option<String>,
    pub files: Vec<String>,
    pub stdin: Option<PathBuf>,
    pub max_time: Option<u32>,
    pub max_memory: Option<u64>,
    pub compile_args: Vec<String>,
    pub link_args: Vec<String>,
    pub run_args: Vec<String>,
    pub debug: bool,
}

/// Parse `ID:FILENAME`
fn parse_file_ref(value: &str) -> Result<FileRef> {
    let Some((id, filename)) = value.split_once(':') else {
        bail!("Expected ID:FILENAME, got '{}'", value);
    };
    if !is_valid_identifier(id) {
        bail!("Invalid file id '{}'", id);
    }
    if filename.is_empty() {
        bail!("Missing filename for file id '{}'", id);
    }
    Ok(FileRef::new(id, filename))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// List sandbox languages
pub async fn list_languages(sandbox: &SandboxClient) -> Result<()> {
    println!("🔎 Querying {} ...", sandbox.base_url());
    let languages = sandbox.languages().await?;

    if languages.is_empty() {
        println!("⚠️  Sandbox reports no languages");
        return Ok(());
    }
    for (name, version) in languages {
        println!("  {:<12} {}", name, version);
    }
    Ok(())
}

/// Stage a local file
pub async fn stage_file(sandbox: &SandboxClient, id: &str, path: &Path) -> Result<()> {
    if !is_valid_identifier(id) {
        bail!("Invalid file id '{}'", id);
    }
    let contents = read_file(path)?;

    println!("📤 Staging {} as '{}' ({} bytes)...", path.display(), id, contents.len());
    sandbox.stage(id, &contents).await?;
    println!("✅ File '{}' staged", id);
    Ok(())
}

/// Report whether a file is staged
pub async fn check_file(sandbox: &SandboxClient, id: &str) -> Result<()> {
    if sandbox.check_exists(id).await? {
        println!("✅ '{}' is staged", id);
    } else {
        println!("❌ '{}' is not staged", id);
    }
    Ok(())
}

fn build_spec(options: RunOptions) -> Result<RunSpec> {
    let source_code = String::from_utf8(read_file(&options.source)?)
        .with_context(|| format!("{} is not valid UTF-8", options.source.display()))?;
    let file_list = options
        .files
        .iter()
        .map(|f| parse_file_ref(f))
        .collect::<Result<Vec<_>>>()?;

    let limits = ResourceLimits {
        max_execution_time: options.max_time,
        max_memory_usage: options.max_memory,
        compile_args: options.compile_args,
        link_args: options.link_args,
        run_args: options.run_args,
    };
    let mut spec = build_run_spec(&options.language, &source_code, file_list, limits)
        .with_context(|| format!("Cannot build a run from {}", options.source.display()))?
        .with_debug(options.debug);

    if let Some(name) = options.source_filename {
        spec = spec.with_source_filename(name);
    }
    if let Some(path) = options.stdin {
        let input = String::from_utf8(read_file(&path)?)
            .with_context(|| format!("{} is not valid UTF-8", path.display()))?;
        spec = spec.with_input(input);
    }
    Ok(spec)
}

/// Submit one run and print what came back
pub async fn run(sandbox: &SandboxClient, options: RunOptions) -> Result<()> {
    let spec = build_spec(options)?;
    println!(
        "🚀 Submitting {} run with {} staged file(s)...",
        spec.language_id,
        spec.file_list.len()
    );

    let reply = sandbox.submit(&spec).await?;
    match reply.status {
        SandboxStatus::Completed => {
            let result = reply.result()?;
            println!("\n📋 Outcome: {}", result.outcome);
            if !result.cmpinfo.is_empty() {
                println!("\n--- compiler ---\n{}", result.cmpinfo);
            }
            if !result.stdout.is_empty() {
                println!("\n--- stdout ---\n{}", result.stdout);
            }
            if !result.stderr.is_empty() {
                println!("\n--- stderr ---\n{}", result.stderr);
            }
            if result.completed_normally() {
                println!("\n✅ Run completed normally");
            } else {
                println!("\n❌ Run did not complete normally");
            }
        }
        SandboxStatus::Queued => {
            println!("⏳ {}", reply.status);
        }
        other => {
            let body = String::from_utf8_lossy(&reply.body);
            bail!("Sandbox rejected run ({}): {}", other, body.trim());
        }
    }
    Ok(())
}
