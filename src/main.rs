mod ui;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::runtime::Handle;

use hubchat::config::{self, AppConfig};
use hubchat::error::ChatError;
use hubchat::network::{HubClient, HubConfig};
use hubchat::session::{ChatSession, SessionContext};
use ui::ChatApp;

#[derive(Parser)]
#[command(
    name = "hubchat",
    version,
    about = "Room chat with disappearing messages"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Display name, overrides HUBCHAT_USER and the config file
    #[arg(long)]
    user: Option<String>,
    /// Room to join, overrides HUBCHAT_ROOM and the config file
    #[arg(long)]
    room: Option<String>,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand)]
enum Mode {
    /// Forward a room's traffic without a UI so clients on other networks can meet
    Relay {
        #[arg(long, default_value = "lobby")]
        room: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    app_config.apply_env_overrides(|key| std::env::var(key).ok());
    let hub_config = HubConfig::from_app_config(&app_config)?;

    match cli.mode {
        Some(Mode::Relay { room }) => run_relay(hub_config, room, cli.config).await,
        None => run_client(hub_config, &app_config, cli.user, cli.room).await,
    }
}

async fn run_relay(
    mut hub_config: HubConfig,
    room: String,
    config_path: String,
) -> Result<(), ChatError> {
    hub_config.relay_room = Some(room);
    hub_config.config_path = Some(config_path);

    // The loop ends once every handle is dropped, so keep this one.
    let (client, _handle) = HubClient::new(hub_config);
    tokio::select! {
        result = client.run() => {
            if let Err(err) = &result {
                log::error!("Relay terminated unexpectedly: {err}");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Relay shutting down");
            Ok(())
        }
    }
}

async fn run_client(
    hub_config: HubConfig,
    app_config: &AppConfig,
    cli_user: Option<String>,
    cli_room: Option<String>,
) -> Result<(), ChatError> {
    let identity = app_config.user_room(cli_user, cli_room)?;

    let (client, handle) = HubClient::new(hub_config);
    tokio::spawn(async move {
        if let Err(err) = client.run().await {
            log::error!("Hub connection terminated: {err}");
        }
    });

    let context = SessionContext::from_config(identity, app_config);
    let session = ChatSession::start(Arc::new(handle), context).await?;
    log::info!(
        "Client started for {} in {}",
        session.identity().user,
        session.identity().room
    );

    let options = eframe::NativeOptions::default();
    let app_session = session.clone();
    let runtime = Handle::current();
    let title = format!("hubchat - {}", session.identity().room);

    let result = eframe::run_native(
        &title,
        options,
        Box::new(move |cc| Ok(Box::new(ChatApp::new(cc, app_session, runtime)))),
    );

    // Closing the window without the leave button still leaves the room.
    if let Err(err) = session.leave().await {
        log::warn!("Leaving the room failed: {err}");
    }
    result.map_err(|err| ChatError::Ui(err.to_string()))
}
