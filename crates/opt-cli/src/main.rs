//! OptShield CLI
//!
//! CLI tool for compiling config records into network rules, validating
//! config files, and simulating the background engine.

use std::collections::HashMap;
use std::fs;
use std::time::Instant;

use clap::{Parser, Subcommand};

use opt_compiler::{compile, compile_custom_filters, Platform};
use opt_core::categories::{Category, TrackerIndex};
use opt_core::config::ConfigRecord;
use opt_core::hosts::AccountService;

mod filestore;
mod remote;
mod simulate;

use remote::HttpAccountService;
use simulate::{run_simulate, SimulateOptions};

#[derive(Parser)]
#[command(name = "opt-cli")]
#[command(about = "OptShield config compiler and engine tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a config record into network rule changes
    Compile {
        /// Config record JSON file
        #[arg(short, long)]
        config: String,

        /// Tracker pattern -> category map, JSON file
        #[arg(long)]
        trackers: Option<String>,

        /// Target platform: chromium or safari
        #[arg(long, default_value = "chromium")]
        platform: String,

        /// Output rules file
        #[arg(short, long, default_value = "rules.json")]
        output: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a config record file
    Validate {
        /// Config file to validate
        #[arg(short, long)]
        input: String,
    },

    /// Dump config record info
    Info {
        /// Config file to inspect
        #[arg(short, long)]
        input: String,
    },

    /// Run the engine against a script of config patches
    Simulate {
        /// Persisted config file (in-memory storage when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Script file: one JSON config patch per line
        #[arg(short, long)]
        script: String,

        /// Target platform: chromium or safari
        #[arg(long, default_value = "chromium")]
        platform: String,

        /// Account service base URL (in-memory service when omitted)
        #[arg(long)]
        remote: Option<String>,

        /// Keep timers running for this long after the script
        #[arg(long, default_value_t = 0)]
        run_ms: u64,
    },

    /// Fetch the remote record from an account service
    Fetch {
        /// Account service base URL
        #[arg(short, long)]
        url: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            config,
            trackers,
            platform,
            output,
            verbose,
        } => cmd_compile(&config, trackers.as_deref(), &platform, &output, verbose),
        Commands::Validate { input } => cmd_validate(&input),
        Commands::Info { input } => cmd_info(&input),
        Commands::Simulate {
            config,
            script,
            platform,
            remote,
            run_ms,
        } => parse_platform(&platform).and_then(|platform| {
            run_simulate(SimulateOptions {
                config,
                script,
                platform,
                remote_url: remote,
                run_ms,
            })
        }),
        Commands::Fetch { url } => cmd_fetch(&url),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn parse_platform(name: &str) -> Result<Platform, String> {
    match name {
        "chromium" => Ok(Platform::Chromium),
        "safari" => Ok(Platform::Safari),
        other => Err(format!("Unknown platform '{other}' (expected chromium or safari)")),
    }
}

fn load_config(path: &str) -> Result<ConfigRecord, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{path}': {e}"))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid config '{path}': {e}"))
}

fn load_trackers(path: Option<&str>) -> Result<TrackerIndex, String> {
    let Some(path) = path else {
        return Ok(TrackerIndex::new());
    };
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{path}': {e}"))?;
    let entries: HashMap<String, Category> =
        serde_json::from_str(&text).map_err(|e| format!("Invalid trackers '{path}': {e}"))?;
    Ok(TrackerIndex::from_entries(entries))
}

fn cmd_compile(
    config_path: &str,
    trackers_path: Option<&str>,
    platform: &str,
    output: &str,
    verbose: bool,
) -> Result<(), String> {
    let start = Instant::now();
    let config = load_config(config_path)?;
    let index = load_trackers(trackers_path)?;
    let platform = parse_platform(platform)?;
    let parse_time = start.elapsed();

    let compile_start = Instant::now();
    let compiled = compile(&config, &index, platform, &[]);
    let compile_time = compile_start.elapsed();

    let result = serde_json::json!({
        "update": compiled.update,
        "rulesets": compiled.rulesets,
        "skippedFilters": compiled.skipped_filters,
    });
    let text = serde_json::to_string_pretty(&result)
        .map_err(|e| format!("Failed to serialize rules: {e}"))?;
    fs::write(output, text).map_err(|e| format!("Failed to write '{output}': {e}"))?;

    let total_time = start.elapsed();

    println!("Compiled '{config_path}' to '{output}'");
    println!("  Rules:    {}", compiled.update.add_rules.len());
    println!(
        "  Rulesets: {} on, {} off",
        compiled.rulesets.enable.len(),
        compiled.rulesets.disable.len()
    );
    if compiled.skipped_filters > 0 {
        println!("  Skipped:  {} custom filter lines", compiled.skipped_filters);
    }
    if verbose {
        println!(
            "  Time:     {:.1}ms (parse: {:.1}ms, compile: {:.1}ms)",
            total_time.as_secs_f64() * 1000.0,
            parse_time.as_secs_f64() * 1000.0,
            compile_time.as_secs_f64() * 1000.0,
        );
    }

    Ok(())
}

fn cmd_validate(input: &str) -> Result<(), String> {
    let config = load_config(input)?;

    let (_, filter_stats) = compile_custom_filters(&config.custom_filters);
    let unscoped_exceptions = config
        .exceptions
        .values()
        .filter(|entry| !entry.global && entry.domains.is_empty())
        .count();

    println!("Config '{input}' is valid");
    println!("  Revision:   {}", config.revision);
    println!("  Paused:     {}", config.paused.len());
    println!("  Exceptions: {}", config.exceptions.len());
    println!(
        "  Filters:    {} ({} unsupported)",
        config.custom_filters.len(),
        filter_stats.skipped
    );
    if unscoped_exceptions > 0 {
        println!("  Warning:    {unscoped_exceptions} scoped exceptions have no domains");
    }

    Ok(())
}

fn cmd_info(input: &str) -> Result<(), String> {
    let config = load_config(input)?;

    println!("Config: {input}");
    println!("  Revision:     {}", config.revision);
    println!("  Sync:         {}", if config.sync_enabled { "on" } else { "off" });
    println!();

    println!("Paused domains:");
    for (id, entry) in &config.paused {
        let deadline = match entry.revoke_at {
            None => "forever".to_string(),
            Some(0) => "unscheduled".to_string(),
            Some(at) => format!("until {at}"),
        };
        println!("  {id}  ({deadline})");
    }
    println!();

    println!("Slices:");
    println!("  Exceptions:   {}", config.exceptions.len());
    println!("  Regional:     {}", config.regional_filters.len());
    println!("  Filters:      {}", config.custom_filters.len());
    println!("  Experimental: {}", config.experimental_filters);

    Ok(())
}

fn cmd_fetch(url: &str) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {e}"))?;
    let service = HttpAccountService::new(url);
    let remote = runtime
        .block_on(service.get_options())
        .map_err(|e| format!("Fetch failed: {e}"))?;

    match remote {
        Some(record) => {
            let text = serde_json::to_string_pretty(&record)
                .map_err(|e| format!("Failed to serialize record: {e}"))?;
            println!("{text}");
        }
        None => println!("No authenticated session"),
    }

    Ok(())
}
