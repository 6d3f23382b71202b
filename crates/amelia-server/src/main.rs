mod config;
mod log_cmd;
mod report_cmd;
mod serve_cmd;
mod status_cmd;
mod wire;
mod workflow_cmds;
mod ws;

pub use serve_cmd::AppState;

use clap::{Parser, Subcommand};

use amelia_db::pool;

use config::AmeliaConfig;

#[derive(Parser)]
#[command(name = "amelia", about = "Agentic software-engineering workflow orchestrator")]
struct Cli {
    /// Database URL (overrides AMELIA_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create and migrate the database
    DbInit,
    /// Run the HTTP + WebSocket server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Create a new workflow
    Create {
        /// Tracker issue ID
        issue_id: String,
        /// Issue title
        #[arg(long)]
        title: String,
        /// Issue description
        #[arg(long)]
        description: String,
        /// External tracker ID for the issue, if different from issue_id
        #[arg(long)]
        tracker_id: Option<String>,
        /// Absolute path to the git worktree the workflow should run in
        #[arg(long)]
        worktree_path: String,
        /// Friendly worktree name
        #[arg(long)]
        worktree_name: Option<String>,
        /// Agent profile to run this workflow with
        #[arg(long)]
        profile: Option<String>,
        /// Override the default max developer/reviewer iterations
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Create the workflow row only; do not start planning
        #[arg(long)]
        pending_only: bool,
        /// Skip the plan-approval gate entirely
        #[arg(long)]
        skip_approval: bool,
    },
    /// Show workflow status and task progress (omit workflow_id to list active workflows)
    Status {
        /// Workflow ID to show status for (omit to list all active workflows)
        workflow_id: Option<String>,
    },
    /// Show the event log for a workflow
    Log {
        /// Workflow ID to show events for
        workflow_id: String,
        /// Only show events after this sequence number
        #[arg(long)]
        after_sequence: Option<i64>,
    },
    /// Approve a workflow's plan
    Approve {
        /// Workflow ID to approve
        workflow_id: String,
    },
    /// Reject a workflow's plan, sending it back for replanning
    Reject {
        /// Workflow ID to reject
        workflow_id: String,
        /// Feedback explaining the rejection
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Force a blocked or in-progress workflow back into planning
    Replan {
        /// Workflow ID to replan
        workflow_id: String,
    },
    /// Cancel a workflow
    Cancel {
        /// Workflow ID to cancel
        workflow_id: String,
    },
    /// Overwrite a workflow's cached plan markdown without replanning
    SetPlan {
        /// Workflow ID to update
        workflow_id: String,
        /// New plan markdown
        plan_markdown: String,
    },
    /// Show token usage and duration report for a workflow
    Report {
        /// Workflow ID to report on
        workflow_id: String,
    },
}

/// Execute the `amelia db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = AmeliaConfig::resolve(cli_db_url);

    println!("Initializing amelia database...");

    pool::ensure_database_exists(&resolved.db).await?;
    let db_pool = pool::create_pool(&resolved.db).await?;

    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("amelia db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = AmeliaConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db).await?;
            serve_cmd::run_serve(db_pool, &resolved, &bind, port).await?;
        }
        Commands::Create {
            issue_id,
            title,
            description,
            tracker_id,
            worktree_path,
            worktree_name,
            profile,
            max_iterations,
            pending_only,
            skip_approval,
        } => {
            let resolved = AmeliaConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db).await?;
            let result = workflow_cmds::run_create(
                db_pool.clone(),
                resolved.orchestrator,
                workflow_cmds::CreateArgs {
                    issue_id,
                    issue_title: title,
                    issue_description: description,
                    issue_tracker_id: tracker_id,
                    worktree_path,
                    worktree_name,
                    profile_name: profile,
                    max_iterations,
                    skip_approval,
                    no_plan: pending_only,
                },
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { workflow_id } => {
            let resolved = AmeliaConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db).await?;
            let result = status_cmd::run_status(&db_pool, workflow_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Log { workflow_id, after_sequence } => {
            let resolved = AmeliaConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db).await?;
            let result = log_cmd::run_log(&db_pool, &workflow_id, after_sequence).await;
            db_pool.close().await;
            result?;
        }
        Commands::Approve { workflow_id } => {
            let resolved = AmeliaConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db).await?;
            let result = workflow_cmds::run_approve(db_pool.clone(), resolved.orchestrator, &workflow_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Reject { workflow_id, feedback } => {
            let resolved = AmeliaConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db).await?;
            let result =
                workflow_cmds::run_reject(db_pool.clone(), resolved.orchestrator, &workflow_id, feedback).await;
            db_pool.close().await;
            result?;
        }
        Commands::Replan { workflow_id } => {
            let resolved = AmeliaConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db).await?;
            let result = workflow_cmds::run_replan(db_pool.clone(), resolved.orchestrator, &workflow_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Cancel { workflow_id } => {
            let resolved = AmeliaConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db).await?;
            let result = workflow_cmds::run_cancel(db_pool.clone(), resolved.orchestrator, &workflow_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::SetPlan { workflow_id, plan_markdown } => {
            let resolved = AmeliaConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db).await?;
            let result =
                workflow_cmds::run_set_plan(db_pool.clone(), resolved.orchestrator, &workflow_id, plan_markdown)
                    .await;
            db_pool.close().await;
            result?;
        }
        Commands::Report { workflow_id } => {
            let resolved = AmeliaConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db).await?;
            let result = report_cmd::run_report(&db_pool, &workflow_id).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

// silence an unused-import false positive on some feature combinations
#[allow(unused_imports)]
use anyhow::Context as _;
