//! DataMap CLI — 工具定义校验、描述符输出与本地调用的命令行工具
//!
//! Usage:
//!   datamap-cli validate <path>...                     Validate definition files or directories
//!   datamap-cli describe <path> [--tool <name>]        Print descriptors as JSON
//!   datamap-cli invoke <path> <tool> [--args <json>]   Run one invocation
//!   datamap-cli schema                                 Print the definition JSON Schema

use anyhow::{anyhow, bail, Context};
use datamap_runtime::definition::{DefinitionValidator, ToolLoader};
use datamap_runtime::engine::DataMapEngine;
use datamap_runtime::telemetry::TracingEventSink;
use datamap_runtime::{CompiledTool, EngineConfig, Invocation};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "validate" => run(cmd_validate(&args[2..])),
        "describe" => run(cmd_describe(&args[2..])),
        "invoke" => run(cmd_invoke(&args[2..])),
        "schema" => cmd_schema(),
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = std::env::var("DATAMAP_LOG")
        .ok()
        .and_then(|s| EnvFilter::try_new(s).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run<F: std::future::Future<Output = anyhow::Result<()>>>(fut: F) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(fut)
}

fn print_usage() {
    println!(
        r#"datamap-cli — DataMap 工具定义命令行工具

USAGE:
    datamap-cli <COMMAND> [OPTIONS]

COMMANDS:
    validate <path>...                  Validate and compile definition files/directories
    describe <path> [--tool <name>]     Print compiled descriptors as JSON
    invoke <path> <tool> [--args <json>] [--global <json>]
                                        Run one invocation and print the host output
    schema                              Print the JSON Schema of a definition document
    version                             Show version information
    help                                Show this help message

ENVIRONMENT:
    DATAMAP_LOG                         Log filter (falls back to RUST_LOG, default "warn")
    DATAMAP_HTTP_TIMEOUT_SECS           Webhook timeout in seconds (default 30)
    DATAMAP_MAX_RETRIES                 Retries per webhook, 0-3 (default 1)"#
    );
}

fn cmd_version() {
    println!("datamap-cli {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_schema() -> anyhow::Result<()> {
    let schema = DefinitionValidator::schema_value()?;
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Value following `flag`, if present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Positional arguments, skipping flags and their values.
fn positionals(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.starts_with("--") {
            iter.next();
        } else {
            out.push(arg.as_str());
        }
    }
    out
}

async fn compile(path: &str) -> anyhow::Result<Vec<CompiledTool>> {
    let loader = ToolLoader::new()?;
    loader
        .compile_path(Path::new(path))
        .await
        .with_context(|| format!("cannot compile {}", path))
}

async fn cmd_validate(args: &[String]) -> anyhow::Result<()> {
    let paths = positionals(args);
    if paths.is_empty() {
        bail!("validate needs at least one path");
    }

    let mut failures = 0usize;
    for path in paths {
        match compile(path).await {
            Ok(tools) => {
                for tool in &tools {
                    println!("  ✓ {} ({})", tool.name(), path);
                }
            }
            Err(e) => {
                failures += 1;
                println!("  ✗ {}: {:#}", path, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} path(s) failed validation", failures);
    }
    println!("All definitions are valid.");
    Ok(())
}

async fn cmd_describe(args: &[String]) -> anyhow::Result<()> {
    let path = positionals(args)
        .first()
        .copied()
        .ok_or_else(|| anyhow!("describe needs a path"))?;
    let tools = compile(path).await?;

    let descriptors: Vec<&Value> = match flag_value(args, "--tool") {
        Some(name) => {
            let tool = tools
                .iter()
                .find(|t| t.name() == name)
                .ok_or_else(|| anyhow!("no tool named '{}' in {}", name, path))?;
            vec![tool.descriptor()]
        }
        None => tools.iter().map(|t| t.descriptor()).collect(),
    };

    let output = if descriptors.len() == 1 {
        serde_json::to_string_pretty(descriptors[0])?
    } else {
        serde_json::to_string_pretty(&descriptors)?
    };
    println!("{}", output);
    Ok(())
}

fn parse_json_flag(args: &[String], flag: &str) -> anyhow::Result<Value> {
    match flag_value(args, flag) {
        Some(text) => serde_json::from_str(text).with_context(|| format!("{} is not valid JSON", flag)),
        None => Ok(Value::Object(Default::default())),
    }
}

async fn cmd_invoke(args: &[String]) -> anyhow::Result<()> {
    let positional = positionals(args);
    let (path, tool_name) = match positional.as_slice() {
        [path, tool, ..] => (*path, *tool),
        _ => bail!("invoke needs a path and a tool name"),
    };
    let arguments = parse_json_flag(args, "--args")?;
    let global = parse_json_flag(args, "--global")?;

    let engine = DataMapEngine::builder()
        .config(EngineConfig::from_env())
        .event_sink(Arc::new(TracingEventSink))
        .tools(compile(path).await?)
        .build()?;

    let result = engine
        .invoke(&Invocation::new(tool_name, arguments).with_global(global))
        .await;
    println!("{}", serde_json::to_string_pretty(&result.to_host_json())?);
    eprintln!(
        "outcome: {} ({} ms)",
        serde_json::to_string(&result.outcome)?,
        result.duration_ms
    );
    Ok(())
}
