//! A full session over a real TCP socket against a scripted simulation.

use std::time::Duration;

use simlink_client::config::ClientConfig;
use simlink_client::transport::TcpTransport;
use simlink_core::{MemoryStore, Role, Session, SessionOutcome, UserCommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

#[tokio::test]
async fn demo_session_completes_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let sim = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();

        let first = lines.next_line().await.unwrap();
        write.write_all(b"task_completed:site_survey\n").await.unwrap();
        write.write_all(b"training_complete\n").await.unwrap();

        let mut rest = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            rest.push(line);
        }
        (first, rest)
    });

    let mut config = ClientConfig::default();
    config.network.sim_address = addr;
    config.user.role = Role::Demo;
    config.session.cinematic_secs = 0;

    let transport = TcpTransport::new(config.network.sim_address.clone(), config.timeout());
    let session = Session::new(
        config.to_session_config(),
        config.launch_context(),
        transport,
        MemoryStore::new(),
    );
    let (tx, rx) = mpsc::channel(8);
    let run = tokio::spawn(session.run(rx));
    assert_ok!(tx.send(UserCommand::Start).await);

    let outcome = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("session did not finish")
        .unwrap();
    assert_eq!(outcome, SessionOutcome::Completed);

    let (first, _rest) = tokio::time::timeout(Duration::from_secs(10), sim)
        .await
        .expect("simulation did not see the stream close")
        .unwrap();
    assert_eq!(first.as_deref(), Some("training_control:start"));
}

#[tokio::test]
async fn unreachable_simulation_fails_after_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut config = ClientConfig::default();
    config.network.sim_address = addr;
    config.user.role = Role::Demo;
    config.session.max_retries = 2;
    config.session.retry_delay_ms = 10;

    let transport = TcpTransport::new(config.network.sim_address.clone(), config.timeout());
    let session = Session::new(
        config.to_session_config(),
        config.launch_context(),
        transport,
        MemoryStore::new(),
    );
    let mut state = session.connection_state();
    let (tx, rx) = mpsc::channel(8);
    let run = tokio::spawn(session.run(rx));
    assert_ok!(tx.send(UserCommand::Start).await);

    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| s.is_terminal()),
    )
    .await
    .expect("connection never gave up")
    .unwrap();

    drop(tx);
    assert_eq!(run.await.unwrap(), SessionOutcome::Detached);
}
