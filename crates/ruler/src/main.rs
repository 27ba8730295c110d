//! Ruler binary entrypoint.
//!
//! Loads a rule store from a JSON state file, runs one ruler operation on behalf
//! of the principal described by the arguments, prints the result together with the
//! scheduler notifications it produced, and writes the store back after a successful
//! change.

use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ruler::cli::{Cli, Commands};
use ruler::{
    InMemoryStore, PostableRuleGroupConfig, RbacAccessControl, RequestContext, RuleRegistry,
    RulerConfig, RulerError, RulerServiceBuilder, SchedulerHandle, StoreSnapshot,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<RulerError>() {
                Some(err) => eprintln!("Error ({}): {e:#}", err.status_code()),
                None => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => RulerConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RulerConfig::default(),
    };
    let principal = cli.principal().context("invalid principal arguments")?;
    let store = Arc::new(load_store(&cli.state)?);

    let (scheduler, mut rx) = SchedulerHandle::channel();
    let ac = if cli.rbac_disabled {
        RbacAccessControl::disabled()
    } else {
        RbacAccessControl::new()
    };
    let service = RulerServiceBuilder::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(scheduler),
    )
    .with_access_control(Arc::new(ac))
    .with_config(config)
    .build();

    let token = CancellationToken::new();
    let mut ctx = RequestContext::new(principal).with_cancellation(token.clone());
    if let Some(timeout) = cli.timeout() {
        ctx = ctx.with_timeout(timeout);
    }
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling request");
            token.cancel();
        }
    });

    let result = execute(&service, &ctx, &cli.command);
    interrupt.abort();
    let result = result?;

    // the service owns the only sender; dropping it closes the channel
    drop(service);
    let registry = RuleRegistry::new();
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        registry.apply(event.clone());
        events.push(event);
    }
    debug!(events = events.len(), live = registry.len(), "scheduler notifications drained");

    if cli.command.is_mutation() {
        save_store(&cli.state, &store.snapshot())?;
    }

    let output = json!({
        "result": result,
        "scheduler_events": events,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn execute(
    service: &ruler::RulerService,
    ctx: &RequestContext,
    command: &Commands,
) -> Result<Value> {
    let value = match command {
        Commands::Apply { namespace, file } => {
            let raw = std::fs::read_to_string(file)
                .with_context(|| format!("reading rule group {}", file.display()))?;
            let group: PostableRuleGroupConfig = serde_json::from_str(&raw)
                .with_context(|| format!("parsing rule group {}", file.display()))?;
            serde_json::to_value(service.post_rule_group_config(ctx, namespace, &group)?)?
        }
        Commands::Delete { namespace, group } => {
            serde_json::to_value(service.delete_alert_rules(ctx, namespace, group.as_deref())?)?
        }
        Commands::Get {
            namespace: Some(namespace),
            group: Some(group),
            ..
        } => serde_json::to_value(service.get_rules_group_config(ctx, namespace, group)?)?,
        Commands::Get {
            namespace: Some(namespace),
            group: None,
            ..
        } => serde_json::to_value(service.get_namespace_rules_config(ctx, namespace)?)?,
        Commands::Get { namespace: None, .. } => {
            serde_json::to_value(service.get_rules_config(ctx, &command.rules_filter())?)?
        }
    };
    Ok(value)
}

fn load_store(path: &Path) -> Result<InMemoryStore> {
    if !path.exists() {
        info!(path = %path.display(), "state file not found, starting with an empty store");
        return Ok(InMemoryStore::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading state {}", path.display()))?;
    let snapshot: StoreSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("parsing state {}", path.display()))?;
    info!(
        path = %path.display(),
        folders = snapshot.folders.len(),
        rules = snapshot.rules.len(),
        "state loaded"
    );
    Ok(InMemoryStore::from_snapshot(snapshot))
}

fn save_store(path: &Path, snapshot: &StoreSnapshot) -> Result<()> {
    let raw = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, raw).with_context(|| format!("writing state {}", path.display()))?;
    debug!(path = %path.display(), rules = snapshot.rules.len(), "state saved");
    Ok(())
}
