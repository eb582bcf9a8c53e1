//! ec2-launcher: provision one EC2 instance through the launcher backend and
//! follow it until it runs, then stop it on request.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ec2_launcher::config::{Overrides, Settings};
use ec2_launcher::lifecycle::{SessionState, Step};
use ec2_launcher::notify::{Notification, NotificationBoard};
use ec2_launcher::poller::poll_until_state;
use ec2_launcher::render::{render_notification, render_state};
use ec2_launcher::{
    ApiError, Credentials, Ec2Client, InstanceBackend, Phase, Session, SessionError, Target,
    Update, VmStatus,
};

#[derive(Parser, Debug)]
#[command(name = "ec2-launcher")]
#[command(about = "Launch and stop a single EC2 instance through the launcher backend")]
#[command(version)]
struct Cli {
    /// Path to a JSON config file (default: <config dir>/ec2-launcher/config.json)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Base URL of the launcher backend
    #[arg(long, global = true, env = "EC2_LAUNCHER_API_URL")]
    api_url: Option<String>,

    /// Seconds between status checks
    #[arg(long, global = true, env = "EC2_LAUNCHER_POLL_SECS")]
    poll_secs: Option<u64>,

    /// Per-request timeout in seconds (requests wait indefinitely by default)
    #[arg(long, global = true, env = "EC2_LAUNCHER_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CredentialArgs {
    /// AWS access key id
    #[arg(
        long,
        env = "EC2_CLIENT_ID",
        default_value = "",
        hide_default_value = true,
        hide_env_values = true
    )]
    client_id: String,

    /// AWS secret access key
    #[arg(
        long,
        env = "EC2_CLIENT_SECRET",
        default_value = "",
        hide_default_value = true,
        hide_env_values = true
    )]
    client_secret: String,
}

impl CredentialArgs {
    fn into_credentials(self) -> Credentials {
        Credentials::new(self.client_id, self.client_secret)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a server, wait until it runs, then stop it on Ctrl-C
    Run {
        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Launch a server and exit once it is running
    Launch {
        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Show the current state of an instance
    Status {
        #[command(flatten)]
        credentials: CredentialArgs,

        /// Instance to query
        #[arg(long)]
        instance_id: String,
    },

    /// Stop an instance
    Stop {
        #[command(flatten)]
        credentials: CredentialArgs,

        /// Instance to stop
        #[arg(long)]
        instance_id: String,

        /// Keep polling until the instance reports stopped
        #[arg(long)]
        wait: bool,
    },
}

type ConsoleSession = Session<Ec2Client, Arc<NotificationBoard>>;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(
        cli.config.as_deref(),
        Overrides {
            api_url: cli.api_url,
            poll_interval_secs: cli.poll_secs,
            request_timeout_secs: cli.timeout_secs,
        },
    )
    .context("Failed to load configuration")?;
    info!(api_url = %settings.api_url, "Using launcher backend");

    let client = Ec2Client::new(settings.api_url.clone(), settings.request_timeout)?;

    match cli.command {
        Command::Run { credentials } => {
            let board = Arc::new(NotificationBoard::new());
            let mut session = new_session(client, &settings, board.clone());
            launch(&mut session, &board, credentials.into_credentials()).await?;

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            println!();
            board.dismiss_all();
            session.request_stop().await?;
            show(session.state(), &board);
            follow(&mut session, &board).await;
            anyhow::ensure!(
                session.state().phase == Phase::AwaitingCredentials,
                "instance did not report stopped"
            );
        }
        Command::Launch { credentials } => {
            let board = Arc::new(NotificationBoard::new());
            let mut session = new_session(client, &settings, board.clone());
            launch(&mut session, &board, credentials.into_credentials()).await?;
            if let Some(instance) = &session.state().instance {
                println!("Instance {} left running.", instance.instance_id);
            }
        }
        Command::Status {
            credentials,
            instance_id,
        } => {
            let credentials = checked(credentials)?;
            let status = client
                .check_status(&credentials, &instance_id)
                .await
                .map_err(|e| report(e, &settings))?;
            print_status(status);
        }
        Command::Stop {
            credentials,
            instance_id,
            wait,
        } => {
            let credentials = checked(credentials)?;
            let stopped = client.stop_instance(&credentials, &instance_id).await;
            match stopped {
                Ok(status) => print_status(status),
                Err(e) => eprintln!(
                    "{}",
                    render_notification(&Notification::new(
                        e.notification_text(),
                        settings.notification_ttl,
                    ))
                ),
            }
            if wait {
                let mut poll = poll_until_state(
                    Arc::new(client),
                    credentials,
                    instance_id,
                    Target::Stopped.as_raw(),
                    settings.poll_interval,
                );
                while let Some(outcome) = poll.next().await {
                    print_status(outcome.map_err(|e| report(e, &settings))?);
                }
            }
        }
    }

    Ok(())
}

fn new_session(
    client: Ec2Client,
    settings: &Settings,
    board: Arc<NotificationBoard>,
) -> ConsoleSession {
    Session::new(Arc::new(client), board)
        .with_poll_interval(settings.poll_interval)
        .with_notification_ttl(settings.notification_ttl)
}

/// Submit credentials and follow the instance until it runs.
async fn launch(
    session: &mut ConsoleSession,
    board: &NotificationBoard,
    credentials: Credentials,
) -> Result<()> {
    match session.submit_credentials(credentials).await {
        Ok(()) => {}
        Err(SessionError::Validation(e)) => anyhow::bail!("Invalid credentials: {e}"),
        Err(e) => return Err(e.into()),
    }
    show(session.state(), board);
    anyhow::ensure!(
        session.state().phase == Phase::WaitingForRunning,
        "failed to launch instance"
    );

    let last = follow(session, board).await;
    anyhow::ensure!(
        last == Some(Update::Reached(Target::Running)),
        "instance did not reach running"
    );
    Ok(())
}

/// Print each update of the active poll until it ends.
async fn follow(session: &mut ConsoleSession, board: &NotificationBoard) -> Option<Update> {
    let mut last = None;
    while let Some(update) = session.next_update().await {
        if update != Update::Stale {
            show(session.state(), board);
        }
        last = Some(update);
    }
    last
}

/// Print the state followed by the notifications that have not expired yet.
fn show(state: &SessionState, board: &NotificationBoard) {
    println!("{}", render_state(state));
    for notification in board.active(Utc::now()) {
        eprintln!("{}", render_notification(&notification));
    }
}

fn checked(credentials: CredentialArgs) -> Result<Credentials> {
    let credentials = credentials.into_credentials();
    credentials
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid credentials: {e}"))?;
    Ok(credentials)
}

fn report(e: ApiError, settings: &Settings) -> anyhow::Error {
    let text = e.notification_text();
    let notification = Notification::new(text.clone(), settings.notification_ttl);
    eprintln!("{}", render_notification(&notification));
    anyhow::Error::new(e).context(text)
}

fn print_status(status: VmStatus) {
    let state = SessionState {
        step: Step::Status,
        instance_type: status.instance_type.clone(),
        region: status.region.clone(),
        instance_link: status.public_ip.clone(),
        status,
        ..SessionState::default()
    };
    println!("{}", render_state(&state));
}
