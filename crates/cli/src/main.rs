//! tasktree CLI - projects and hierarchical tasks with rolled-up progress.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tasktree_core::{
    ParentFilter, ParseError, Priority, Project, ProjectId, ProjectStatus, Task, TaskFilter,
    TaskId, TaskStatus, Time, User, UserId, UserType,
};
use tasktree_progress::{RollupConfig, RollupReport, DEFAULT_MAX_DEPTH};
use tasktree_storage::{JsonStorage, Storage};
use tasktree_work::{
    parse_delta, AccessPolicy, Actor, AllowAll, BasicWorkManager, ProjectChanges, ProjectManager,
    ProjectSpec, RolePolicy, TaskChanges, TaskSpec, UserManager, UserSpec, WorkError,
    WorkManager,
};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "tasktree")]
#[command(about = "Projects and hierarchical tasks with rolled-up progress", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalOpts {
    /// Data directory (JSON files, or the SQLite database)
    #[arg(long, global = true, env = "TASKTREE_DATA_DIR", default_value = ".tasktree")]
    data_dir: PathBuf,

    /// Storage backend
    #[arg(long, global = true, env = "TASKTREE_BACKEND", value_enum, default_value = "json")]
    backend: Backend,

    /// Acting user ID
    #[arg(long, global = true, env = "TASKTREE_USER")]
    user: Option<String>,

    /// Maximum number of ancestors one rollup may update
    #[arg(long, global = true, env = "TASKTREE_MAX_DEPTH", default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Json,
    Sqlite,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users
    #[command(subcommand)]
    User(UserCommand),
    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommand),
    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),
}

#[derive(Subcommand)]
enum UserCommand {
    /// Add a user (the first user may be added without --user)
    Add {
        /// Display name
        name: String,
        /// Email address
        email: String,
        /// Role: admin, pm or member
        #[arg(long = "type", default_value = "member")]
        user_type: String,
        /// Password hash produced by an external hasher
        #[arg(long, default_value = "")]
        password_hash: String,
    },
    /// List users
    List,
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Create a project
    Add {
        /// Title
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Start date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        start: Option<String>,
        /// End date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        end: Option<String>,
        /// Planning, active, on-hold or completed
        #[arg(long)]
        status: Option<String>,
    },
    /// List projects you created or have tasks in
    List,
    /// Show project details
    Show {
        /// Project ID
        id: String,
    },
    /// Update a project you created
    Update {
        /// Project ID
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Delete a project you created
    Delete {
        /// Project ID
        id: String,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Create a task
    Add {
        /// Title
        title: String,
        /// Project ID
        #[arg(long)]
        project: String,
        /// Parent task ID
        #[arg(long)]
        parent: Option<String>,
        /// Share of the parent's progress
        #[arg(long, default_value_t = 0.0)]
        weight: f64,
        #[arg(long, default_value = "")]
        description: String,
        /// Low, medium or high
        #[arg(long)]
        priority: Option<String>,
        /// Due date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        due: Option<String>,
        /// Assignee user ID
        #[arg(long)]
        assign: Option<String>,
    },
    /// List your tasks
    List {
        /// Only tasks of this project
        #[arg(long)]
        project: Option<String>,
        /// Only children of this task
        #[arg(long, conflicts_with = "roots")]
        parent: Option<String>,
        /// Only top-level tasks
        #[arg(long)]
        roots: bool,
    },
    /// Show task details
    Show {
        /// Task ID
        id: String,
    },
    /// Update task fields
    Update {
        /// Task ID
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        assign: Option<String>,
    },
    /// Delete a task (subtasks are kept)
    Delete {
        /// Task ID
        id: String,
    },
    /// Mark a leaf task as started
    Start {
        /// Task ID
        id: String,
    },
    /// Change a leaf task's progress by a signed amount, e.g. +10 or -5
    Progress {
        /// Task ID
        id: String,
        /// Signed percentage points
        #[arg(allow_hyphen_values = true)]
        amount: String,
        /// History note
        #[arg(long)]
        note: Option<String>,
    },
    /// Complete a leaf task
    Complete {
        /// Task ID
        id: String,
    },
    /// Print the subtree under a task
    Tree {
        /// Task ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.global.backend {
        Backend::Json => match JsonStorage::new(&cli.global.data_dir).await {
            Ok(storage) => run(Arc::new(storage), cli).await,
            Err(e) => Err(e.into()),
        },
        Backend::Sqlite => open_sqlite(cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(exit_status(&err))
        }
    }
}

/// 2 for rejected input or permissions, 1 for backend failures.
fn exit_status(err: &anyhow::Error) -> u8 {
    let client = match err.downcast_ref::<WorkError>() {
        Some(work) => work.is_client_error(),
        None => err.downcast_ref::<ParseError>().is_some(),
    };
    if client {
        2
    } else {
        1
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(cli: Cli) -> Result<()> {
    use tasktree_storage::SqliteStorage;

    std::fs::create_dir_all(&cli.global.data_dir)?;
    let path = cli.global.data_dir.join("tasktree.db");
    let storage = SqliteStorage::new(&format!("sqlite://{}", path.display())).await?;
    run(Arc::new(storage), cli).await
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_cli: Cli) -> Result<()> {
    Err(anyhow!("this build has no SQLite support; rebuild with --features sqlite"))
}

async fn run<S: Storage + 'static>(storage: Arc<S>, cli: Cli) -> Result<()> {
    let policy: Arc<dyn AccessPolicy> = Arc::new(RolePolicy);
    let users = UserManager::new(Arc::clone(&storage)).with_policy(Arc::clone(&policy));

    let actor = match &cli.global.user {
        Some(id) => Some(users.actor_for(parse_id::<UserId>(id, "user")?).await?),
        None => None,
    };
    debug!("Acting as {:?}", actor.map(|a| a.user_id));

    match cli.command {
        Commands::User(cmd) => user_command(storage, users, actor, cmd).await,
        Commands::Project(cmd) => {
            let projects = ProjectManager::new(storage).with_policy(policy);
            project_command(&projects, &require(actor)?, cmd).await
        }
        Commands::Task(cmd) => {
            let tasks = BasicWorkManager::new(storage)
                .with_policy(policy)
                .with_rollup_config(RollupConfig { max_depth: cli.global.max_depth });
            task_command(&tasks, &require(actor)?, cmd).await
        }
    }
}

fn require(actor: Option<Actor>) -> Result<Actor> {
    actor.ok_or_else(|| anyhow!("no acting user; pass --user or set TASKTREE_USER"))
}

async fn user_command<S: Storage + 'static>(
    storage: Arc<S>,
    users: UserManager<S>,
    actor: Option<Actor>,
    cmd: UserCommand,
) -> Result<()> {
    match cmd {
        UserCommand::Add { name, email, user_type, password_hash } => {
            // An empty store has nobody who could authorize the first account.
            let users = if storage.list_users().await?.is_empty() {
                info!("No users yet; creating the first account without authorization");
                UserManager::new(storage).with_policy(Arc::new(AllowAll))
            } else {
                users
            };
            let spec = UserSpec {
                name,
                email,
                password_hash,
                user_type: Some(user_type.parse::<UserType>()?),
            };
            let user = users.create_user(actor.as_ref(), spec).await?;
            println!(
                "Added user: {} - {} <{}> ({})",
                user.id, user.name, user.email, user.user_type
            );
        }
        UserCommand::List => {
            let list = users.list_users(&require(actor)?).await?;
            println!("Users ({})", list.len());
            for user in list {
                print_user_line(&user);
            }
        }
    }
    Ok(())
}

async fn project_command<S: Storage + 'static>(
    projects: &ProjectManager<S>,
    actor: &Actor,
    cmd: ProjectCommand,
) -> Result<()> {
    match cmd {
        ProjectCommand::Add { title, description, start, end, status } => {
            let spec = ProjectSpec {
                title,
                description,
                start_date: start.as_deref().map(parse_date).transpose()?,
                end_date: end.as_deref().map(parse_date).transpose()?,
                status: status.as_deref().map(str::parse::<ProjectStatus>).transpose()?,
            };
            let project = projects.create_project(actor, spec).await?;
            println!("Added project: {} - {}", project.id, project.title);
        }
        ProjectCommand::List => {
            let list = projects.list_projects(actor).await?;
            println!("Projects ({})", list.len());
            for project in list {
                println!("  {} | {} | {}", project.id, project.status, project.title);
            }
        }
        ProjectCommand::Show { id } => {
            let project = projects.get_project(parse_id(&id, "project")?).await?;
            print_project(&project);
        }
        ProjectCommand::Update { id, title, description, start, end, status } => {
            let changes = ProjectChanges {
                title,
                description,
                start_date: start.as_deref().map(parse_date).transpose()?,
                end_date: end.as_deref().map(parse_date).transpose()?,
                status: status.as_deref().map(str::parse::<ProjectStatus>).transpose()?,
            };
            let project = projects
                .update_project(actor, parse_id(&id, "project")?, changes)
                .await?;
            print_project(&project);
        }
        ProjectCommand::Delete { id } => {
            let id: ProjectId = parse_id(&id, "project")?;
            projects.delete_project(actor, id).await?;
            println!("Project removed: {}", id);
        }
    }
    Ok(())
}

async fn task_command<M: WorkManager>(tasks: &M, actor: &Actor, cmd: TaskCommand) -> Result<()> {
    match cmd {
        TaskCommand::Add { title, project, parent, weight, description, priority, due, assign } => {
            let spec = TaskSpec {
                title,
                description,
                project_id: parse_id(&project, "project")?,
                parent_task: parent.as_deref().map(|p| parse_id(p, "task")).transpose()?,
                status: None,
                priority: priority.as_deref().map(str::parse::<Priority>).transpose()?,
                due_date: due.as_deref().map(parse_date).transpose()?,
                assigned_to: assign.as_deref().map(|u| parse_id(u, "user")).transpose()?,
                weight: Some(weight),
            };
            let task = tasks.create_task(actor, spec).await?;
            println!("Added task: {} - {} (level {})", task.id, task.title, task.level);
        }
        TaskCommand::List { project, parent, roots } => {
            let parent = match (parent, roots) {
                (Some(p), _) => Some(ParentFilter::Of(parse_id(&p, "task")?)),
                (None, true) => Some(ParentFilter::Root),
                (None, false) => None,
            };
            let filter = TaskFilter {
                project: project.as_deref().map(|p| parse_id(p, "project")).transpose()?,
                parent,
                ..Default::default()
            };
            let list = tasks.list_tasks(actor, filter).await?;

            println!("Tasks ({})", list.len());
            for task in list {
                println!(
                    "  {} | {} | {:>3}% | {} - {}",
                    task.id,
                    format_status(task.status),
                    task.progress,
                    task.priority,
                    task.title,
                );
            }
        }
        TaskCommand::Show { id } => {
            let task = tasks.get_task(parse_id(&id, "task")?).await?;
            print_task(&task);
        }
        TaskCommand::Update { id, title, description, status, priority, due, assign } => {
            let changes = TaskChanges {
                title,
                description,
                status: status.as_deref().map(str::parse::<TaskStatus>).transpose()?,
                priority: priority.as_deref().map(str::parse::<Priority>).transpose()?,
                due_date: due.as_deref().map(parse_date).transpose()?,
                assigned_to: assign.as_deref().map(|u| parse_id(u, "user")).transpose()?,
            };
            let task = tasks.update_task(actor, parse_id(&id, "task")?, changes).await?;
            print_task(&task);
        }
        TaskCommand::Delete { id } => {
            let id: TaskId = parse_id(&id, "task")?;
            tasks.delete_task(actor, id).await?;
            println!("Task removed: {}", id);
        }
        TaskCommand::Start { id } => {
            let task = tasks.start_task(actor, parse_id(&id, "task")?).await?;
            println!("Started task: {} - {}", task.id, task.title);
        }
        TaskCommand::Progress { id, amount, note } => {
            let delta = parse_delta(&amount)?;
            let outcome = tasks
                .update_progress(actor, parse_id(&id, "task")?, delta, note)
                .await?;
            println!("Task {}: {}%", outcome.task.id, outcome.task.progress);
            print_rollup(&outcome.rollup);
        }
        TaskCommand::Complete { id } => {
            let outcome = tasks.complete_task(actor, parse_id(&id, "task")?).await?;
            println!("Completed task: {} - {}", outcome.task.id, outcome.task.title);
            print_rollup(&outcome.rollup);
        }
        TaskCommand::Tree { id } => {
            let nodes = tasks.task_tree(parse_id(&id, "task")?).await?;
            for node in nodes {
                println!(
                    "{}{} {:>3}% (w {}) {} [{}]",
                    "  ".repeat(node.depth),
                    node.task.id,
                    node.task.progress,
                    node.task.weight,
                    node.task.title,
                    format_status(node.task.status),
                );
            }
        }
    }
    Ok(())
}

fn parse_id<T>(s: &str, kind: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    s.trim()
        .parse()
        .map_err(|e| anyhow!("Invalid {} ID '{}': {}", kind, s, e))
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
fn parse_date(s: &str) -> Result<Time> {
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("Invalid date '{}'", s))?;
        return Ok(midnight.and_utc());
    }
    let parsed = chrono::DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid date '{}'", s))?;
    Ok(parsed.with_timezone(&chrono::Utc))
}

fn format_status(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::NotStarted => "TODO",
        TaskStatus::InProgress => "ACTIVE",
        TaskStatus::Completed => "DONE",
    }
}

fn format_date(date: Option<Time>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_user_line(user: &User) {
    println!("  {} | {} | {} <{}>", user.id, user.user_type, user.name, user.email);
}

fn print_project(project: &Project) {
    println!("Project: {}", project.id);
    println!("  Title: {}", project.title);
    println!("  Description: {}", project.description);
    println!("  Status: {}", project.status);
    println!("  Dates: {} .. {}", format_date(project.start_date), format_date(project.end_date));
    println!("  Created by: {}", project.created_by);
    println!("  Created: {}", project.created_at);
}

fn print_task(task: &Task) {
    println!("Task: {}", task.id);
    println!("  Title: {}", task.title);
    println!("  Description: {}", task.description);
    println!("  Status: {}", task.status);
    println!("  Priority: {}", task.priority);
    println!("  Progress: {}% (weight {})", task.progress, task.weight);
    println!("  Level: {}", task.level);
    println!("  Project: {}", task.project_id);
    if let Some(parent) = task.parent_task {
        println!("  Parent: {}", parent);
    }
    if let Some(assignee) = task.assigned_to {
        println!("  Assigned to: {}", assignee);
    }
    println!("  Due: {}", format_date(task.due_date));
    println!("  Created: {}", task.created_at);
    if !task.progress_history.is_empty() {
        println!("  History:");
        for entry in &task.progress_history {
            println!(
                "    {} {:>3}% {}",
                entry.timestamp.format("%Y-%m-%d %H:%M"),
                entry.progress,
                entry.note
            );
        }
    }
}

fn print_rollup(report: &RollupReport) {
    for step in &report.updated {
        println!("  ancestor {} -> {}%", step.task_id, step.progress);
    }
    for warning in &report.warnings {
        eprintln!("  warning: {}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasktree_storage::StorageError;

    #[test]
    fn test_exit_status() {
        let not_found = anyhow::Error::from(WorkError::not_found("task", TaskId::new()));
        assert_eq!(exit_status(&not_found), 2);

        let bad_role = anyhow::Error::from("boss".parse::<UserType>().unwrap_err());
        assert_eq!(exit_status(&bad_role), 2);

        let backend = anyhow::Error::from(WorkError::from(StorageError::Other("io".to_string())));
        assert_eq!(exit_status(&backend), 1);
        assert_eq!(exit_status(&anyhow!("no acting user")), 1);
    }
}
