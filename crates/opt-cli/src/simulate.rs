//! Run the full engine against in-process hosts.
//!
//! The script file carries one JSON config patch per line; each is applied
//! as a commit, then the simulator reports the derived rules and alarms.
//! With `--run-ms` it keeps the timers live afterwards, forwarding fired
//! alarms into the engine so auto-resume can be watched end to end.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use opt_compiler::Platform;
use opt_core::categories::TrackerIndex;
use opt_core::config::ConfigPatch;
use opt_engine::emulated::{MemoryAccount, MemoryRuleHost, MemoryPersistence, TokioAlarms};
use opt_engine::{Engine, Hosts};

use crate::filestore::JsonFileStore;
use crate::remote::HttpAccountService;

pub struct SimulateOptions {
    pub config: Option<String>,
    pub script: String,
    pub platform: Platform,
    pub remote_url: Option<String>,
    pub run_ms: u64,
}

pub fn run_simulate(opts: SimulateOptions) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {e}"))?;
    runtime.block_on(run_simulate_async(opts))
}

async fn run_simulate_async(opts: SimulateOptions) -> Result<(), String> {
    let script = fs::read_to_string(&opts.script)
        .map_err(|e| format!("Failed to read '{}': {}", opts.script, e))?;

    let persistence: Arc<dyn opt_core::hosts::Persistence> = match &opts.config {
        Some(path) => Arc::new(JsonFileStore::new(path.clone())),
        None => Arc::new(MemoryPersistence::new()),
    };
    let account: Arc<dyn opt_core::hosts::AccountService> = match &opts.remote_url {
        Some(url) => Arc::new(HttpAccountService::new(url.clone())),
        None => Arc::new(MemoryAccount::new()),
    };
    let rules = Arc::new(MemoryRuleHost::new());
    let (alarms, mut fired_rx) = TokioAlarms::new();

    let engine = Engine::new(
        Hosts {
            persistence,
            rules: rules.clone(),
            alarms,
            account,
        },
        TrackerIndex::new(),
        opts.platform,
    );
    engine.start().await;
    engine
        .is_ready(Duration::from_secs(5), "engine did not come up")
        .await
        .map_err(|e| e.to_string())?;

    for (line_number, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let patch: ConfigPatch = serde_json::from_str(line)
            .map_err(|e| format!("Bad patch on line {}: {}", line_number + 1, e))?;
        let record = engine
            .update(&patch)
            .await
            .map_err(|e| format!("Commit on line {} failed: {}", line_number + 1, e))?;
        println!("[{}] committed revision {}", line_number + 1, record.revision);
    }

    engine.wait_for_idle().await;
    report(&engine, &rules).await?;

    if opts.run_ms > 0 {
        println!();
        println!("Running timers for {}ms...", opts.run_ms);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(opts.run_ms);
        loop {
            tokio::select! {
                fired = fired_rx.recv() => {
                    let Some(name) = fired else { break };
                    println!("  alarm fired: {name}");
                    engine.alarm_fired(&name).await;
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        engine.wait_for_idle().await;
        report(&engine, &rules).await?;
    }

    Ok(())
}

async fn report(engine: &Engine, rules: &MemoryRuleHost) -> Result<(), String> {
    let record = engine
        .store()
        .get()
        .await
        .map_err(|e| format!("Failed to read record: {e}"))?;
    let installed = rules.rules();

    println!();
    println!("Record:");
    println!("  Revision:    {}", record.revision);
    println!("  Paused:      {}", record.paused.len());
    println!("  Exceptions:  {}", record.exceptions.len());
    println!("  Filters:     {}", record.custom_filters.len());
    println!("Derived state:");
    println!("  Rules:       {}", installed.len());
    println!("  Rulesets on: {}", rules.enabled_rulesets().len());
    for rule in &installed {
        let rule_json = serde_json::to_string(rule)
            .map_err(|e| format!("Failed to serialize rule: {e}"))?;
        println!("    {rule_json}");
    }
    Ok(())
}
