//! Command-line interface for the NativeBridge extension bridge.
//!
//! Resolves, inspects and calls native extensions from the shell.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nativebridge_core::extension::resolver;
use nativebridge_core::prelude::*;
use serde::Serialize;
use serde_json::Value;

/// NativeBridge - inspect and call native extensions.
#[derive(Parser, Debug)]
#[command(name = "nativebridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Print the path an extension name resolves to.
    Resolve {
        /// Extension name or absolute path.
        name: String,
    },
    /// List extension libraries found in the search directories.
    List,
    /// Load an extension and show its metadata and call surface.
    Info {
        /// Extension name or absolute path.
        name: String,
    },
    /// Call one command on an extension and print the reply.
    Call {
        /// Extension name or absolute path.
        name: String,
        /// Command to issue.
        command: String,
        /// Arguments as a JSON array, in declaration order.
        #[arg(long, default_value = "[]")]
        args: String,
        /// Give up on a non-blocking call after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => BridgeConfig::from_env(),
    };

    match args.command {
        Command::Resolve { name } => run_resolve(config, &name),
        Command::List => run_list(config),
        Command::Info { name } => run_info(config, &name),
        Command::Call {
            name,
            command,
            args,
            timeout_ms,
        } => run_call(config, &name, &command, &args, timeout_ms).await,
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose {
        "nativebridge=debug"
    } else {
        "nativebridge=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn registry(config: BridgeConfig) -> ExtensionRegistry {
    ExtensionRegistry::new(config, Arc::new(NativeModuleLoader::new()))
}

fn run_resolve(config: BridgeConfig, name: &str) -> Result<()> {
    let path = registry(config).resolve(name)?;
    println!("{}", path.display());
    Ok(())
}

fn run_list(config: BridgeConfig) -> Result<()> {
    let dirs: Vec<_> = config.candidate_dirs().map(|d| d.to_path_buf()).collect();
    let found = registry(config).discover();

    if found.is_empty() {
        println!("No extensions found.");
        println!();
        println!("Searched:");
        for dir in dirs {
            println!("  {}", dir.display());
        }
        return Ok(());
    }

    println!("{:<24} PATH", "NAME");
    for path in found {
        let name = resolver::name_from_path(&path).unwrap_or_else(|| "?".to_string());
        println!("{:<24} {}", name, path.display());
    }
    Ok(())
}

#[derive(Serialize)]
struct InfoReport<'a> {
    path: &'a std::path::Path,
    instance_id: String,
    #[serde(flatten)]
    metadata: &'a ExtensionMetadata,
}

fn run_info(config: BridgeConfig, name: &str) -> Result<()> {
    let registry = registry(config);
    let instance = registry.require_instance(name)?;
    let report = InfoReport {
        path: &instance.descriptor.loadable_path,
        instance_id: instance.instance_id.to_string(),
        metadata: &instance.descriptor.metadata,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Parse `--args` into call arguments.
fn parse_args(raw: &str) -> Result<Vec<ArgValue>> {
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    match value {
        Value::Array(items) => Ok(items.into_iter().map(ArgValue::from).collect()),
        _ => bail!("--args must be a JSON array"),
    }
}

async fn run_call(
    config: BridgeConfig,
    name: &str,
    command: &str,
    raw_args: &str,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let call_args = parse_args(raw_args)?;
    let registry = registry(config);
    let exports = registry.require(name)?;

    let mode = exports
        .surface()
        .command(command)
        .map(|spec| spec.mode)
        .ok_or_else(|| BridgeError::UnknownCommand(command.to_string()))?;

    let reply = match mode {
        CallMode::Post => {
            exports.post(command, &call_args)?;
            println!("posted");
            return Ok(());
        }
        CallMode::Blocking => exports.call_sync(command, &call_args)?,
        CallMode::Async => match timeout_ms {
            Some(ms) => {
                exports
                    .call_with_timeout(command, &call_args, Duration::from_millis(ms))
                    .await?
            }
            None => exports.call_async(command, &call_args).await?,
        },
    };

    println!("{}", serde_json::to_string_pretty(reply.fields())?);
    Ok(())
}
