use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use taskdeck::config::{RemoteConfig, Timeouts};
use taskdeck::guard::Navigation;
use taskdeck::list::ListState;
use taskdeck::types::{NewTodo, TeamRole, TodoStatus};
use taskdeck::{AccessError, AppState, ConfigError};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("no cached todo with id {0}")]
    UnknownTodo(Uuid),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "taskdeck", about = "Team and todo client for a hosted PostgREST/GoTrue backend")]
struct Cli {
    #[arg(long, env = "TASKDECK_URL")]
    url: String,

    #[arg(long, env = "TASKDECK_ANON_KEY", hide_env_values = true)]
    anon_key: String,

    #[arg(long, env = "TASKDECK_SESSION_FILE", help = "Defaults to ~/.taskdeck/session.json")]
    session_file: Option<PathBuf>,

    #[arg(long, env = "TASKDECK_REQUEST_TIMEOUT_SECS", default_value_t = taskdeck::config::DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout_secs: u64,

    #[arg(long, env = "TASKDECK_CONNECT_TIMEOUT_SECS", default_value_t = taskdeck::config::DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Signup(Credentials),
    Login(Credentials),
    Logout,
    Whoami,
    /// Show where the navigation guard sends the current session for `path`.
    Route {
        path: String,
    },
    Profiles(ProfilesCommand),
    Projects(ProjectsCommand),
    Teams(TeamsCommand),
    Todos(TodosCommand),
}

#[derive(Args, Debug)]
struct Credentials {
    #[arg(long)]
    email: String,
    #[arg(long, env = "TASKDECK_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args, Debug)]
struct ProfilesCommand {
    #[command(subcommand)]
    command: ProfilesSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProfilesSubcommand {
    List,
}

#[derive(Args, Debug)]
struct ProjectsCommand {
    #[command(subcommand)]
    command: ProjectsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProjectsSubcommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    Rm {
        project_id: Uuid,
    },
}

#[derive(Args, Debug)]
struct TeamsCommand {
    #[command(subcommand)]
    command: TeamsSubcommand,
}

#[derive(Subcommand, Debug)]
enum TeamsSubcommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Members {
        team_id: Uuid,
    },
    Invite {
        team_id: Uuid,
        user_id: Uuid,
        #[arg(long, default_value_t = false)]
        admin: bool,
    },
    Rm {
        team_id: Uuid,
    },
}

#[derive(Args, Debug)]
struct TodosCommand {
    #[command(subcommand)]
    command: TodosSubcommand,
}

#[derive(Subcommand, Debug)]
enum TodosSubcommand {
    List,
    Add(TodoAddArgs),
    /// Flip a todo between done and todo.
    Done {
        todo_id: Uuid,
    },
    Status {
        todo_id: Uuid,
        #[arg(value_parser = parse_status)]
        status: TodoStatus,
    },
    Rm {
        todo_id: Uuid,
    },
}

#[derive(Args, Debug)]
struct TodoAddArgs {
    title: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, value_parser = parse_status, default_value = "todo")]
    status: TodoStatus,
    #[arg(long)]
    team: Option<Uuid>,
    #[arg(long)]
    assignee: Option<Uuid>,
    #[arg(long)]
    responsible: Option<Uuid>,
    #[arg(long, value_parser = parse_deadline, help = "RFC 3339, e.g. 2026-05-01T17:00:00Z")]
    deadline: Option<OffsetDateTime>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = RemoteConfig::new(&cli.url, cli.anon_key);
    config.timeouts = Timeouts { request_secs: cli.request_timeout_secs, connect_secs: cli.connect_timeout_secs };
    config.session_file = cli.session_file.or_else(default_session_file);
    let state = AppState::connect(&config)?;

    match cli.command {
        Command::Signup(creds) => {
            let auth = state.session.sign_up(&creds.email, &creds.password).await?;
            if auth.session.is_none() {
                eprintln!("check your inbox to confirm the account before logging in");
            }
            print_json(&auth.user)
        }
        Command::Login(creds) => {
            let auth = state.session.sign_in(&creds.email, &creds.password).await?;
            print_json(&auth.user)
        }
        Command::Logout => {
            state.session.sign_out().await?;
            println!("signed out");
            Ok(())
        }
        Command::Whoami => {
            state.session.initialize().await?;
            match state.session.user() {
                Some(user) => print_json(&user),
                None => {
                    println!("not signed in");
                    Ok(())
                }
            }
        }
        Command::Route { path } => {
            match state.guard.before_each(&path).await {
                Navigation::Proceed => println!("proceed {path}"),
                Navigation::Redirect(target) => println!("redirect {target}"),
            }
            Ok(())
        }
        Command::Profiles(profiles) => run_profiles(&state, profiles).await,
        Command::Projects(projects) => run_projects(&state, projects).await,
        Command::Teams(teams) => run_teams(&state, teams).await,
        Command::Todos(todos) => run_todos(&state, todos).await,
    }
}

async fn run_profiles(state: &AppState, profiles: ProfilesCommand) -> Result<(), CliError> {
    match profiles.command {
        ProfilesSubcommand::List => {
            state.profiles.fetch_all().await;
            print_list(&state.profiles.state())
        }
    }
}

async fn run_projects(state: &AppState, projects: ProjectsCommand) -> Result<(), CliError> {
    match projects.command {
        ProjectsSubcommand::List => {
            state.projects.fetch_all().await;
            print_list(&state.projects.state())
        }
        ProjectsSubcommand::Add { name, color } => {
            let project = state
                .projects
                .create(&name, color.as_deref())
                .await?;
            print_json(&project)
        }
        ProjectsSubcommand::Rm { project_id } => {
            state.projects.delete(project_id).await?;
            println!("deleted {project_id}");
            Ok(())
        }
    }
}

async fn run_teams(state: &AppState, teams: TeamsCommand) -> Result<(), CliError> {
    match teams.command {
        TeamsSubcommand::List => {
            state.teams.fetch_all().await;
            print_list(&state.teams.state())
        }
        TeamsSubcommand::Add { name, description } => {
            let team = state
                .teams
                .create_team(&name, description.as_deref())
                .await?;
            print_json(&team)
        }
        TeamsSubcommand::Members { team_id } => {
            let members = state.teams.fetch_team_members(team_id).await?;
            print_json(&members)
        }
        TeamsSubcommand::Invite { team_id, user_id, admin } => {
            let role = if admin { TeamRole::Admin } else { TeamRole::default() };
            state.teams.add_member(team_id, user_id, role).await?;
            println!("added {user_id} to {team_id}");
            Ok(())
        }
        TeamsSubcommand::Rm { team_id } => {
            state.teams.delete_team(team_id).await?;
            println!("deleted {team_id}");
            Ok(())
        }
    }
}

async fn run_todos(state: &AppState, todos: TodosCommand) -> Result<(), CliError> {
    match todos.command {
        TodosSubcommand::List => {
            state.todos.fetch_all().await?;
            print_list(&state.todos.state())
        }
        TodosSubcommand::Add(args) => {
            let new = NewTodo {
                title: args.title,
                description: args.description,
                status: args.status,
                team_id: args.team,
                assignee_id: args.assignee,
                responsible_id: args.responsible,
                deadline: args.deadline,
            };
            let todo = state.todos.create(&new).await?;
            print_json(&todo)
        }
        TodosSubcommand::Done { todo_id } => {
            // Toggling needs the cached row.
            state.todos.fetch_all().await?;
            let todo = state
                .todos
                .toggle_complete(todo_id)
                .await?
                .ok_or(CliError::UnknownTodo(todo_id))?;
            print_json(&todo)
        }
        TodosSubcommand::Status { todo_id, status } => {
            let todo = state.todos.set_status(todo_id, status).await?;
            print_json(&todo)
        }
        TodosSubcommand::Rm { todo_id } => {
            state.todos.delete(todo_id).await?;
            println!("deleted {todo_id}");
            Ok(())
        }
    }
}

fn default_session_file() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".taskdeck").join("session.json"))
}

fn parse_status(raw: &str) -> Result<TodoStatus, String> {
    raw.parse()
}

fn parse_deadline(raw: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|e| format!("invalid deadline '{raw}': {e}"))
}

fn print_list<T: Serialize>(state: &ListState<T>) -> Result<(), CliError> {
    if let Some(error) = &state.error {
        return Err(CliError::Fetch(error.clone()));
    }
    print_json(&state.items)
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
