mod input;
mod render;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use parlor_core::{
    ChatError, Command, Credential, CredentialStore, Session, SessionConfig, SessionOptions,
    SettingsStore, Termination,
};
use tokio::sync::mpsc;

use crate::input::{LineMapper, QUIT};
use crate::render::TerminalRenderer;

/// Exit status that sends the user back to the login step.
const EXIT_UNAUTHORIZED: u8 = 2;

const KEYRING_SERVICE: &str = "parlor";
const TOKEN_FILE: &str = "access_token";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("no data directory; pass --data-dir or set PARLOR_DATA_DIR")]
    NoDataDir,
    #[error("no display name; pass --name or set PARLOR_USER")]
    MissingName,
    #[error(transparent)]
    Core(#[from] ChatError),
}

#[derive(Parser, Debug)]
#[command(name = "parlor", about = "Terminal client for Parlor chat rooms")]
struct Cli {
    /// Display name shown to other participants. Remembered for next time.
    #[arg(long, env = "PARLOR_USER")]
    name: Option<String>,

    /// Bearer token from the login flow.
    #[arg(long, env = "PARLOR_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Where settings and the stored token live.
    #[arg(long, env = "PARLOR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Join this room right away instead of asking. Becomes the default room.
    #[arg(long)]
    room: Option<String>,

    /// Minimum gap between outgoing typing notices; 0 sends one per keystroke.
    #[arg(long)]
    typing_throttle_ms: Option<u64>,

    /// Development override for the chat server address.
    #[arg(long, env = "PARLOR_SERVER_URL", hide = true)]
    server_url: Option<String>,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parlor_core=debug,parlor_cli=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(Termination::Unauthorized) => {
            eprintln!("Your session is no longer valid. Sign in again.");
            ExitCode::from(EXIT_UNAUTHORIZED)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Termination, CliError> {
    let data_dir = cli
        .data_dir
        .or_else(|| dirs::data_dir().map(|dir| dir.join("parlor")))
        .ok_or(CliError::NoDataDir)?;
    tracing::info!("data dir {}", data_dir.display());

    let settings = SettingsStore::new(&data_dir);
    if let Some(name) = cli.name.as_ref().filter(|name| !name.trim().is_empty()) {
        if settings.get().display_name.as_ref() != Some(name) {
            settings.set_display_name(Some(name.clone()));
        }
    }
    if let Some(room) = cli.room.as_ref().filter(|room| !room.is_empty()) {
        settings.set_default_room(room.clone());
    }
    if let Some(ms) = cli.typing_throttle_ms {
        settings.set_typing_throttle_ms(Some(ms));
    }
    let current = settings.get();
    let identity = cli.name.or(current.display_name.clone()).ok_or(CliError::MissingName)?;
    let credential = load_credential(cli.token, &data_dir, &identity)?;
    if credential.is_none() {
        tracing::warn!("no credential found; the server will refuse the session");
    }

    let mut session = Session::new(SessionConfig {
        identity: Some(identity),
        credential,
        options: SessionOptions::from(&current),
    })?;
    if let Some(server_url) = cli.server_url {
        session = session.with_server_url(server_url);
    }
    session.add_listener(Arc::new(TerminalRenderer));

    let (commands, rx) = mpsc::unbounded_channel();
    let mapper = match cli.room.filter(|room| !room.is_empty()) {
        Some(room) => {
            // Queued ahead of any typed line.
            let _ = commands.send(Command::Join(room));
            LineMapper::joined()
        }
        None => {
            println!("Room to join [{}]:", current.default_room);
            LineMapper::new(current.default_room)
        }
    };
    spawn_input(commands, mapper);
    println!("Type a message and press Enter. {QUIT} leaves.");

    Ok(session.run(rx).await)
}

/// Flag or env token first, then the token file, then the OS keyring.
fn load_credential(
    token: Option<String>,
    data_dir: &Path,
    user: &str,
) -> Result<Option<Credential>, CliError> {
    if let Some(credential) = token.and_then(Credential::new) {
        return Ok(Some(credential));
    }
    if let Some(credential) = CredentialStore::from_file(&data_dir.join(TOKEN_FILE))? {
        return Ok(Some(credential));
    }
    match CredentialStore::from_keyring(KEYRING_SERVICE, user) {
        Ok(credential) => Ok(credential),
        Err(e) => {
            tracing::warn!("keyring unavailable: {e}");
            Ok(None)
        }
    }
}

/// Read stdin on a plain thread so a blocked read never holds up runtime
/// shutdown. Dropping the sender at EOF ends the session.
fn spawn_input(commands: mpsc::UnboundedSender<Command>, mut mapper: LineMapper) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("stdin: {e}");
                    break;
                }
            };
            for command in mapper.map(&line) {
                if commands.send(command).is_err() {
                    return;
                }
            }
        }
    });
}
