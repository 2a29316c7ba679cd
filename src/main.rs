//! Guarded Agent CLI
//!
//! start 运行一个新会话；遇到需审批的调用时默认挂起并落盘，之后用 resume 给出决定。
//! --interactive 时在终端里直接询问 yes / no / modify。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use guarded_agent::config::{load_config, AppConfig};
use guarded_agent::core::verify_audit;
use guarded_agent::engine::{
    ApprovalChannel, ApprovalDecision, ApprovalRequest, ChannelApproval, DeferredApproval,
    EngineEvent, Executor, LlmReasoner, SessionEngine, SessionOutcome, TimeoutApproval,
};
use guarded_agent::observability;
use guarded_agent::tools::ToolExecutor;

#[derive(Parser)]
#[command(
    name = "guarded-agent",
    version,
    about = "Tool-using agent with a human approval gate for risky actions"
)]
struct Cli {
    /// Extra config file layered over config/default.toml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new session with an initial request.
    Start {
        session: String,
        message: String,
        /// Override [engine] max_iterations.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Ask for approvals on this terminal instead of suspending.
        #[arg(short, long)]
        interactive: bool,
    },
    /// Deliver an approval decision (approve / reject / modify) to a suspended session.
    Resume {
        session: String,
        decision: ApprovalDecision,
        /// Only apply the decision if it targets this call id.
        #[arg(long)]
        call_id: Option<String>,
        /// Ask for any further approvals on this terminal.
        #[arg(short, long)]
        interactive: bool,
    },
    /// Show phase, iteration count and pending action of a session.
    Status { session: String },
    /// Print the audit log of a session as JSON lines.
    Audit {
        session: String,
        /// Check audit invariants and fail if any is violated.
        #[arg(long)]
        verify: bool,
    },
    /// List saved sessions.
    List,
    /// Delete a saved session.
    Archive { session: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;

    match cli.command {
        Command::Start {
            session,
            message,
            max_iterations,
            interactive,
        } => {
            let engine = build_engine(&cfg, interactive)?;
            let max = max_iterations.unwrap_or(cfg.engine.max_iterations);
            let outcome = engine.start(&session, &message, max).await?;
            print_outcome(&outcome);
        }
        Command::Resume {
            session,
            decision,
            call_id,
            interactive,
        } => {
            let engine = build_engine(&cfg, interactive)?;
            let outcome = match call_id {
                Some(id) => engine.resolve_approval(&session, &id, decision).await?,
                None => engine.resume(&session, decision).await?,
            };
            print_outcome(&outcome);
        }
        Command::Status { session } => {
            let engine = build_engine(&cfg, false)?;
            let status = engine.status(&session).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Audit { session, verify } => {
            let engine = build_engine(&cfg, false)?;
            let state = engine.snapshot(&session).await?;
            for entry in state.audit.entries() {
                println!("{}", serde_json::to_string(entry)?);
            }
            if verify {
                let violations = verify_audit(&state.audit);
                if !violations.is_empty() {
                    for v in &violations {
                        eprintln!("violation: {v}");
                    }
                    bail!("{} audit invariant violation(s)", violations.len());
                }
                eprintln!("audit ok ({} entries)", state.audit.len());
            }
        }
        Command::List => {
            let engine = build_engine(&cfg, false)?;
            for id in engine.list().await? {
                println!("{id}");
            }
        }
        Command::Archive { session } => {
            let engine = build_engine(&cfg, false)?;
            if engine.archive(&session).await? {
                println!("archived {session}");
            } else {
                println!("no such session: {session}");
            }
        }
    }

    Ok(())
}

fn build_engine(cfg: &AppConfig, interactive: bool) -> Result<SessionEngine> {
    let registry = Arc::new(cfg.build_registry()?);
    let reasoner = Arc::new(LlmReasoner::new(cfg.build_llm(), &registry));
    let tools = ToolExecutor::new(registry, cfg.engine.tool_timeout_secs);
    let checkpoints = cfg.build_checkpointer()?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(print_events(event_rx));

    let executor = Executor::new(reasoner, tools, checkpoints)
        .with_approvals(approval_channel(cfg, interactive))
        .with_event_tx(event_tx);
    Ok(SessionEngine::new(executor))
}

fn approval_channel(cfg: &AppConfig, interactive: bool) -> Arc<dyn ApprovalChannel> {
    if !interactive {
        return Arc::new(DeferredApproval);
    }
    let (channel, requests) = ChannelApproval::new();
    tokio::spawn(prompt_on_stdin(requests));
    match cfg.approval.timeout_secs {
        Some(secs) => Arc::new(TimeoutApproval::new(channel, Duration::from_secs(secs))),
        None => Arc::new(channel),
    }
}

/// 终端审批：逐个请求询问，直到得到合法答复；stdin 关闭时放弃（会话挂起）
async fn prompt_on_stdin(mut requests: mpsc::UnboundedReceiver<ApprovalRequest>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(request) = requests.recv().await {
        let p = &request.pending;
        println!();
        println!("APPROVAL REQUIRED [{}] {}", p.risk_level, p.tool_name);
        println!("  call id: {}", p.call_id);
        println!("  args:    {}", p.args);
        loop {
            println!("Approve? (yes / no / modify)");
            match lines.next_line().await {
                Ok(Some(line)) => match line.parse::<ApprovalDecision>() {
                    Ok(decision) => {
                        request.respond(decision);
                        break;
                    }
                    Err(e) => println!("{e}"),
                },
                _ => return,
            }
        }
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::StepUpdate {
                iteration,
                max_iterations,
            } => println!("[step {iteration}/{max_iterations}]"),
            EngineEvent::ToolCall { tool, args, .. } => println!("  -> {tool} {args}"),
            EngineEvent::Observation { tool, preview, .. } => println!("  <- {tool}: {preview}"),
            EngineEvent::ToolFailure { tool, reason, .. } => println!("  !! {tool}: {reason}"),
            EngineEvent::ApprovalResolved {
                granted, message, ..
            } => println!("  {} {message}", if granted { "✓" } else { "✗" }),
            _ => {}
        }
    }
}

fn print_outcome(outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Finished(report) => {
            if report.hit_iteration_limit() {
                println!("Stopped after {} iterations (limit reached).", report.iterations);
            }
            match &report.answer {
                Some(answer) => println!("{answer}"),
                None => println!("(no answer)"),
            }
        }
        SessionOutcome::AwaitingApproval {
            session_id,
            pending,
        } => {
            println!(
                "Session {session_id} is waiting for approval of {} [{}] (call {}).",
                pending.tool_name, pending.risk_level, pending.call_id
            );
            println!("  args: {}", pending.args);
            println!("Run: guarded-agent resume {session_id} <approve|reject|modify>");
        }
    }
}
