mod adapter;
mod config;
mod engine;
mod error;
mod logging;
mod paths;
mod workspace;

use crate::adapter::OllamaAdapter;
use crate::config::Config;
use crate::engine::lifecycle::LifecycleManager;
use crate::engine::orchestrator::Orchestrator;
use crate::engine::permission::PermissionGate;
use crate::engine::router::IntentRouter;
use crate::engine::tool_exec::ToolExecutor;
use crate::engine::types::{Decision, PermissionRequest};
use anyhow::Result;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// A local, CPU-first AI coding assistant orchestration core.
#[derive(Parser, Debug)]
#[command(name = "forge", version, about = "codeforge — a local AI coding assistant", long_about = None)]
struct Cli {
    /// Workspace root. If omitted, detects by walking up for .git.
    #[arg(long, global = true)]
    root: Option<std::path::PathBuf>,

    /// Verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// A single utterance to process. When omitted, reads utterances from
    /// stdin in an interactive loop.
    utterance: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    if let Err(e) = logging::setup_tracing_with_settings(logging::LoggingSettings { level: Some(level), directory: None, retention_days: None }) {
        eprintln!("failed to initialize logging: {e}");
    }

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            2
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load()?;
    let workspace_root = workspace::resolve_workspace_root(cli.root.or_else(|| config.workspace_dir.clone()))?;

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let adapter: Arc<dyn crate::adapter::EngineAdapter> = Arc::new(OllamaAdapter::new(config.url.clone()));
    let lifecycle = Arc::new(LifecycleManager::new(adapter.clone(), &config));
    let router = IntentRouter::new(lifecycle.clone(), adapter.clone(), cancel_rx.clone());
    let tool_executor = ToolExecutor::new(workspace_root.clone(), config.allow_shell, config.generation_timeout_sec);
    let permission_file = Some(paths::data_dir().join("permissions.json"));
    let permission = PermissionGate::new(permission_file, config.require_confirmation, Box::new(prompt_user));

    let orchestrator = Orchestrator::new(lifecycle.clone(), adapter, router, tool_executor, permission, cancel_rx);

    let utterance_arg = if cli.utterance.is_empty() { None } else { Some(cli.utterance.join(" ")) };

    let result = if let Some(utterance) = utterance_arg {
        let rendered = orchestrator.process(&utterance).await;
        println!("{rendered}");
        0
    } else {
        run_interactive(&orchestrator).await
    };

    lifecycle.shutdown().await;
    Ok(result)
}

async fn run_interactive(orchestrator: &Orchestrator) -> i32 {
    let stdin = io::stdin();
    print!("> ");
    let _ = io::stdout().flush();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            print!("> ");
            let _ = io::stdout().flush();
            continue;
        }
        if matches!(trimmed, "exit" | "quit") {
            break;
        }
        let rendered = orchestrator.process(trimmed).await;
        println!("{rendered}");
        print!("> ");
        let _ = io::stdout().flush();
    }
    0
}

/// The default confirmation prompt: reads a yes/no/always answer from
/// stdin. Swapped out in tests for a scripted closure.
fn prompt_user(req: &PermissionRequest) -> Decision {
    print!("{} [{:?}]{} — allow once / allow for session / deny? (o/s/n) ", req.description, req.category, if req.destructive { " (destructive)" } else { "" });
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return Decision::Deny;
    }
    match answer.trim().to_lowercase().as_str() {
        "o" | "once" | "y" | "yes" => Decision::AllowOnce,
        "s" | "session" | "always" => Decision::AllowBatch,
        _ => Decision::Deny,
    }
}
