//! cadencectl - command-line client for cadenced

use anyhow::{bail, Context, Result};
use cadence_api::{Command, FocusWeights, ResponsePayload, ResponseResult, TaskStatus};
use cadence_ipc::IpcClient;
use cadence_util::{default_socket_path, SessionId, TaskId, WorkspaceId};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "cadencectl")]
#[command(about = "Control cadenced sessions", long_about = None)]
struct Cli {
    /// Socket path (or set CADENCE_SOCKET env var)
    #[arg(short, long, env = "CADENCE_SOCKET", default_value_os_t = default_socket_path())]
    socket: PathBuf,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Manage workspaces
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },

    /// Start a session and begin planning
    Start {
        workspace: String,
        goal: String,
        /// Time budget in minutes
        #[arg(long, default_value_t = 60)]
        minutes: u32,
        #[arg(long, default_value_t = 0.5)]
        bugs: f64,
        #[arg(long, default_value_t = 0.5)]
        features: f64,
        #[arg(long, default_value_t = 0.0)]
        refactor: f64,
    },

    /// Cancel a session
    Cancel { session: String },

    /// End a session
    End {
        session: String,
        /// Summary text replacing the generated one
        #[arg(long)]
        summary: Option<String>,
    },

    /// Show a session
    Show { session: String },

    /// List a session's tasks
    Tasks { session: String },

    /// Edit a task
    Task {
        task: String,
        /// pending, in_progress, completed or skipped
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Follow a session's event stream, one JSON frame per line
    Watch {
        session: String,
        /// Only events after this sequence number
        #[arg(long, default_value_t = 0)]
        cursor: u64,
    },

    /// Show service health
    Health,
}

#[derive(Subcommand, Debug)]
enum WorkspaceAction {
    /// Register a project root
    Add { name: String, path: PathBuf },
}

async fn run(cli: Cli) -> Result<()> {
    let mut client = IpcClient::connect(&cli.socket)
        .await
        .with_context(|| format!("Failed to connect to {}", cli.socket.display()))?;

    let command = match cli.command {
        Action::Watch { session, cursor } => {
            return watch(client, SessionId::from(session), cursor).await;
        }
        Action::Workspace {
            action: WorkspaceAction::Add { name, path },
        } => {
            let root_path = std::path::absolute(&path)
                .with_context(|| format!("Invalid path {}", path.display()))?;
            Command::CreateWorkspace { name, root_path }
        }
        Action::Start {
            workspace,
            goal,
            minutes,
            bugs,
            features,
            refactor,
        } => Command::StartSession {
            workspace_id: WorkspaceId::from(workspace),
            goal,
            time_budget_minutes: minutes,
            focus: FocusWeights::new(bugs, features, refactor),
        },
        Action::Cancel { session } => Command::CancelSession {
            session_id: SessionId::from(session),
        },
        Action::End { session, summary } => Command::EndSession {
            session_id: SessionId::from(session),
            summary,
        },
        Action::Show { session } => Command::GetSession {
            session_id: SessionId::from(session),
        },
        Action::Tasks { session } => Command::ListTasks {
            session_id: SessionId::from(session),
        },
        Action::Task {
            task,
            status,
            notes,
        } => Command::UpdateTask {
            task_id: TaskId::from(task),
            status,
            notes,
        },
        Action::Health => Command::GetHealth,
    };

    let response = client.send(command).await?;

    match response.result {
        ResponseResult::Ok(payload) => print_payload(&payload),
        ResponseResult::Err(e) => bail!("{:?}: {}", e.code, e.message),
    }
}

fn print_payload(payload: &ResponsePayload) -> Result<()> {
    match payload {
        ResponsePayload::Tasks { tasks } => {
            for task in tasks {
                println!(
                    "{:>2}  {:<11}  {:<9}  {}  {}",
                    task.position, task.status.as_str(), task.category, task.task_id, task.title
                );
            }
        }
        ResponsePayload::Ended { summary, .. } => println!("{}", summary),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

async fn watch(client: IpcClient, session_id: SessionId, cursor: u64) -> Result<()> {
    let mut stream = client
        .stream_events(session_id, cursor)
        .await
        .context("Failed to open event stream")?;

    while let Some(frame) = stream.next().await? {
        println!("{}", serde_json::to_string(&frame)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
