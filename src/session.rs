//! Creating and joining game sessions.

use std::sync::Arc;

use anyhow::{ensure, Context};
use tracing::{info, instrument, warn};

use crate::{
    configuration::ConnectionConfig,
    connection::Connection,
    connection_handler::ConnectionHandler,
    proxy::ConnectionProxy,
};

/// URL a bot connects to in order to play in `session_id`.
pub fn join_url(server: &str, session_id: &str, bot_name: &str) -> String {
    format!("{server}/join_to_game?player_name={bot_name}&session_id={session_id}&is_spectator=False")
}

/// URL that creates a new session of `game_type`.
pub fn create_game_url(server: &str, name: &str, game_type: &str) -> String {
    format!("{server}/create_game?name={name}&type={game_type}")
}

/// Asks the server for a new session and returns its identifier.
///
/// The server answers with the identifier as the first frame of a short-lived connection.
#[instrument(skip(server))]
pub async fn create_game(server: &str, name: &str, game_type: &str) -> anyhow::Result<String> {
    let connection = Connection::open(&create_game_url(server, name, game_type)).await?;
    let frame = connection
        .recv_frame()
        .await
        .context("server did not answer with a session id")?;
    if let Err(e) = connection.disconnect().await {
        warn!("could not close the session creation connection: {e:#}");
    }
    let session_id = String::from_utf8(frame).context("session id is not valid UTF-8")?;
    let session_id = session_id.trim().to_owned();
    ensure!(!session_id.is_empty(), "server returned an empty session id");
    info!(session_id, "game created");
    Ok(session_id)
}

/// Connects `config.bot_name()` to the session of `config`.
pub async fn join_game(config: &ConnectionConfig) -> anyhow::Result<Connection> {
    ensure!(
        !config.session_id().is_empty(),
        "session id is empty, a valid one is needed to join an existing game"
    );
    Connection::open(&join_url(
        config.server(),
        config.session_id(),
        config.bot_name(),
    ))
    .await
}

/// What [`make_env`] should create or join.
#[derive(Debug, Clone)]
pub struct EnvRequest {
    /// Base URL of the server.
    pub server: String,
    /// Game name, used when a new session is created.
    pub name: String,
    /// Game to create or join.
    pub game_type: String,
    /// Name the bot plays under.
    pub bot_name: String,
    /// Session to join. A new session is created when absent.
    pub session_id: Option<String>,
}

/// Creates (unless `request.session_id` is given) and joins a game through `handler`.
///
/// On success the handler holds the connection and the resulting [`ConnectionConfig`].
pub fn make_env(
    handler: &Arc<ConnectionHandler>,
    request: EnvRequest,
) -> anyhow::Result<Arc<Connection>> {
    let session_id = match request.session_id {
        Some(session_id) => session_id,
        None => {
            let (server, name, game_type) = (
                request.server.clone(),
                request.name.clone(),
                request.game_type.clone(),
            );
            let (_task, future) = handler
                .reactor()
                .submit(async move { create_game(&server, &name, &game_type).await })?;
            future.wait().context("could not create a game")?
        }
    };

    let config = ConnectionConfig::new(
        request.server,
        session_id,
        request.bot_name,
        request.game_type,
    );
    handler.set_config(config.clone());

    let proxy = ConnectionProxy::new(handler, |config: ConnectionConfig| async move {
        join_game(&config).await
    })?;
    let connection = proxy.invoke(config)?;
    info!("established connection at: {}", connection.host());
    Ok(connection)
}

/// Session of the connection managed by `handler`.
pub fn get_session_id(handler: &ConnectionHandler) -> Option<String> {
    handler
        .config()
        .map(|config| config.session_id().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        assert_eq!(
            join_url("ws://localhost:2137", "session_1", "RandomAgent_0"),
            "ws://localhost:2137/join_to_game?player_name=RandomAgent_0&session_id=session_1&is_spectator=False"
        );
        assert_eq!(
            create_game_url("ws://localhost:2137", "arena", "agarnt"),
            "ws://localhost:2137/create_game?name=arena&type=agarnt"
        );
    }

    #[test]
    fn joining_needs_a_session() {
        let config = ConnectionConfig::new("ws://127.0.0.1:1", "", "bot", "agarnt");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let error = runtime.block_on(join_game(&config)).err().unwrap();
        assert!(error.to_string().contains("session id is empty"));
    }
}
