use std::time::Duration;

use botbattles::{
    connection_handler::ConnectionHandler,
    session::{create_game, get_session_id, make_env, EnvRequest},
};
use common::{init_logger, unused_url, Script, StubServer};

mod common;

fn env_request(server: &str, session_id: Option<&str>) -> EnvRequest {
    EnvRequest {
        server: server.to_owned(),
        name: "arena".to_owned(),
        game_type: "agarnt".to_owned(),
        bot_name: "RandomAgent_0".to_owned(),
        session_id: session_id.map(str::to_owned),
    }
}

#[test]
fn created_games_are_identified_by_the_first_frame() {
    init_logger();
    let server = StubServer::start(Script {
        greeting: Some("session_42\n".to_owned()),
        ..Script::default()
    });
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let session_id = runtime
        .block_on(create_game(server.url(), "arena", "agarnt"))
        .unwrap();
    assert_eq!(session_id, "session_42");
}

#[test]
fn make_env_creates_then_joins() {
    init_logger();
    let server = StubServer::start(Script {
        greeting: Some("session_7".to_owned()),
        ..Script::default()
    });
    let handler = ConnectionHandler::new();
    let connection = make_env(&handler, env_request(server.url(), None)).unwrap();

    assert!(connection.is_open());
    assert_eq!(get_session_id(&handler).as_deref(), Some("session_7"));
    assert_eq!(handler.config().unwrap().bot_name(), "RandomAgent_0");
    assert_eq!(server.connections(), 2);
    handler.close(Duration::from_secs(1));
}

#[test]
fn make_env_joins_existing_sessions() {
    init_logger();
    let server = StubServer::start(Script::default());
    let handler = ConnectionHandler::new();
    make_env(&handler, env_request(server.url(), Some("session_1"))).unwrap();

    assert_eq!(get_session_id(&handler).as_deref(), Some("session_1"));
    assert_eq!(server.connections(), 1);
    handler.close(Duration::from_secs(1));
}

#[test]
fn make_env_fails_without_a_server() {
    init_logger();
    let handler = ConnectionHandler::new();
    assert!(make_env(&handler, env_request(&unused_url(), None)).is_err());
    assert!(handler.connection().is_none());
    handler.close(Duration::from_secs(1));
}
