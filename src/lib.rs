pub mod application;
pub mod domain;
pub mod infrastructure;

use application::commands::{
    adjust_schedule_event_time_impl, clear_access_token_impl, convert_google_event_impl,
    delete_schedule_event_impl, discover_calendars_impl, list_calendars_impl,
    list_schedule_events_impl, list_unconverted_events_impl, push_schedule_event_impl,
    set_access_token_impl, set_calendar_enabled_impl, sync_now_impl, AppState,
};
use clap::{Parser, Subcommand};
use infrastructure::error::InfraError;
use infrastructure::logging::init_logging;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_FAILURE: u8 = 1;
const EXIT_REAUTHORIZE: u8 = 2;

#[derive(Parser)]
#[command(name = "fieldsync", version, about = "Calendar sync for field inspection scheduling")]
struct Cli {
    /// Workspace directory holding config/, state/ and logs/ (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the workspace layout, default configs and database
    Bootstrap,
    /// Pull enabled calendars, then detect cancellations and reschedules
    Sync {
        /// Window start (RFC3339 or YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Window end (RFC3339 or YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },
    /// Push one schedule event to its calendar
    Push { schedule_event_id: String },
    /// Move a schedule event and mirror the change
    Adjust {
        schedule_event_id: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// Delete a schedule event locally and remotely
    Delete { schedule_event_id: String },
    /// List schedule events of a job
    Events { job_id: String },
    /// List calendar events not linked to any job
    Unlinked {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Turn an unlinked calendar event into a job
    Convert {
        google_event_id: String,
        #[arg(long)]
        name: String,
    },
    /// Calendar selection
    Calendars {
        #[command(subcommand)]
        action: CalendarAction,
    },
    /// Calendar access token management
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Subcommand)]
enum CalendarAction {
    /// Show known calendars and whether they are synced
    List,
    /// Fetch the account's calendar list and record new calendars
    Discover,
    /// Include a calendar in sync passes
    Enable { calendar_id: String },
    /// Exclude a calendar from sync passes
    Disable { calendar_id: String },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Store an access token in the OS keyring
    SetToken {
        token: String,
        /// Expiry (RFC3339); the token is not used after this instant
        #[arg(long)]
        expires_at: Option<String>,
    },
    /// Remove the stored access token
    Clear,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => match std::env::current_dir() {
            Ok(path) => path,
            Err(error) => {
                eprintln!("error: failed to resolve current directory: {error}");
                return ExitCode::from(EXIT_FAILURE);
            }
        },
    };

    let state = match AppState::new(workspace_root) {
        Ok(state) => state,
        Err(error) => {
            eprintln!("error: failed to initialize workspace: {error}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    let settings = state.settings();
    if let Err(error) = init_logging(state.logs_dir(), &settings.log_level, settings.log_json) {
        eprintln!("error: {error}");
        return ExitCode::from(EXIT_FAILURE);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("error: failed to start runtime: {error}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let (name, outcome) = runtime.block_on(dispatch(&state, cli.command));
    match outcome {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("error: {}", state.command_error(name, &error));
            if error.is_authentication() {
                ExitCode::from(EXIT_REAUTHORIZE)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}

async fn dispatch(
    state: &AppState,
    command: Commands,
) -> (&'static str, Result<String, InfraError>) {
    match command {
        Commands::Bootstrap => (
            "bootstrap",
            render(&serde_json::json!({
                "workspaceRoot": state.workspace_root().display().to_string(),
                "configDir": state.config_dir().display().to_string(),
                "databasePath": state.database_path().display().to_string(),
            })),
        ),
        Commands::Sync { from, to } => (
            "sync",
            render_result(sync_now_impl(state, from, to).await),
        ),
        Commands::Push { schedule_event_id } => (
            "push",
            render_result(push_schedule_event_impl(state, schedule_event_id).await),
        ),
        Commands::Adjust {
            schedule_event_id,
            start,
            end,
        } => (
            "adjust",
            render_result(
                adjust_schedule_event_time_impl(state, schedule_event_id, start, end).await,
            ),
        ),
        Commands::Delete { schedule_event_id } => (
            "delete",
            render_result(delete_schedule_event_impl(state, schedule_event_id).await),
        ),
        Commands::Events { job_id } => (
            "events",
            render_result(list_schedule_events_impl(state, job_id)),
        ),
        Commands::Unlinked { from, to } => (
            "unlinked",
            render_result(list_unconverted_events_impl(state, from, to)),
        ),
        Commands::Convert { google_event_id, name } => (
            "convert",
            render_result(convert_google_event_impl(state, google_event_id, name)),
        ),
        Commands::Calendars { action } => match action {
            CalendarAction::List => ("calendars_list", render_result(list_calendars_impl(state))),
            CalendarAction::Discover => (
                "calendars_discover",
                render_result(discover_calendars_impl(state).await),
            ),
            CalendarAction::Enable { calendar_id } => (
                "calendars_enable",
                render_result(set_calendar_enabled_impl(state, calendar_id, true)),
            ),
            CalendarAction::Disable { calendar_id } => (
                "calendars_disable",
                render_result(set_calendar_enabled_impl(state, calendar_id, false)),
            ),
        },
        Commands::Auth { action } => match action {
            AuthAction::SetToken { token, expires_at } => (
                "auth_set_token",
                render_result(set_access_token_impl(state, token, expires_at)),
            ),
            AuthAction::Clear => ("auth_clear", render_result(clear_access_token_impl(state))),
        },
    }
}

fn render_result<T: Serialize>(result: Result<T, InfraError>) -> Result<String, InfraError> {
    result.and_then(|value| render(&value))
}

fn render<T: Serialize>(value: &T) -> Result<String, InfraError> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_calendar_commands() {
        let cli = Cli::try_parse_from(["fieldsync", "calendars", "disable", "holidays@example.com"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Calendars {
                action: CalendarAction::Disable { ref calendar_id }
            } if calendar_id == "holidays@example.com"
        ));

        let cli = Cli::try_parse_from([
            "fieldsync",
            "--workspace",
            "/tmp/ws",
            "sync",
            "--from",
            "2024-05-01",
        ])
        .expect("parse");
        assert_eq!(cli.workspace, Some(PathBuf::from("/tmp/ws")));
        assert!(matches!(cli.command, Commands::Sync { from: Some(_), to: None }));
    }
}
