//! Two peers in one process: a host and a guest play a short dice match
//! over TCP on localhost. Halfway through, the guest drops its connection
//! and both sides reconnect on their own.
//!
//! ```text
//! cargo run -p duel-chat            # port 7878
//! RUST_LOG=debug cargo run -p duel-chat -- 9000
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use pairlink::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 7878;
const MAX_TURNS: u32 = 8;
const REDIAL_DELAY: Duration = Duration::from_millis(500);
const ROWS: [&str; 6] = ["ones", "twos", "threes", "fours", "fives", "sixes"];

// ---------------------------------------------------------------------------
// Reconnection policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Role {
    Host,
    Guest,
}

async fn establish(
    role: Role,
    factory: &StreamFactory,
    port: u16,
    cancel: &CancelToken,
) -> Result<pairlink::TcpByteStream, TransportError> {
    let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    match role {
        Role::Host => factory.listen_and_accept(addr, port, cancel).await,
        Role::Guest => factory.connect(addr, port, cancel).await,
    }
}

/// Dials a new stream every time the connection is lost, until it closes
/// or `stop` fires.
async fn keep_connected(
    role: Role,
    connection: TcpConnection,
    port: u16,
    stop: CancelToken,
) {
    let factory = StreamFactory::new();
    let mut states = connection.watch_state();

    loop {
        let lost_or_closed = |state: &ConnectionState| {
            matches!(state, ConnectionState::Lost | ConnectionState::Closed)
        };
        let state = match stop.run(states.wait_for(lost_or_closed)).await {
            Ok(Ok(state)) => *state,
            _ => return,
        };
        if state == ConnectionState::Closed {
            return;
        }

        match establish(role, &factory, port, &stop).await {
            Ok(stream) => {
                let passer =
                    MessagePasser::new(stream, PasserSettings::default());
                if let Err(err) = connection.reopen(passer).await {
                    tracing::warn!(?role, error = %err, "reopen refused");
                    return;
                }
            }
            Err(TransportError::Cancelled) => return,
            Err(err) => {
                tracing::warn!(?role, error = %err, "dial failed, retrying");
                if stop.sleep(REDIAL_DELAY).await.is_err() {
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// The match
// ---------------------------------------------------------------------------

/// Deterministic dice so both runs of the demo look the same.
fn roll(turn: u32) -> TurnReport {
    let dice: Vec<u8> =
        (0..5u32).map(|i| ((turn * 7 + i * 3) % 6 + 1) as u8).collect();
    let points = dice.iter().map(|&d| u32::from(d)).sum();
    TurnReport {
        turn,
        note: (points > 20).then(|| "nice roll".to_string()),
        score: Some(ScoreEntry {
            column: "free".into(),
            row: ROWS[turn as usize % ROWS.len()].into(),
            points,
        }),
        dice,
    }
}

/// Plays until one side resigns. Returns the points this player scored.
async fn play(
    me: &TcpCommunicator,
    name: &'static str,
    starts: bool,
    drop_after: Option<u32>,
) -> u32 {
    let mut inbox = me.subscribe();
    let mut score = 0;

    if starts {
        let first = roll(1);
        score += first.score.as_ref().map_or(0, |s| s.points);
        me.queue_for_sending(Message::Turn(first));
    } else {
        me.queue_for_sending(Message::Chat {
            text: "good luck".into(),
        });
    }

    loop {
        let message = match inbox.recv().await {
            Ok(message) => message,
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(player = name, missed, "fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match message {
            Message::Ping => {}
            Message::Chat { text } => {
                tracing::info!(player = name, %text, "chat");
            }
            Message::Turn(report) => {
                tracing::info!(
                    player = name,
                    turn = report.turn,
                    dice = ?report.dice,
                    "opponent rolled"
                );
                if report.turn >= MAX_TURNS {
                    me.queue_for_sending(Message::Resign {
                        reason: Some("out of turns".into()),
                    });
                    break;
                }
                let mine = roll(report.turn + 1);
                score += mine.score.as_ref().map_or(0, |s| s.points);
                me.queue_for_sending(Message::Turn(mine));

                if drop_after == Some(report.turn) {
                    tracing::info!(player = name, "simulating a network drop");
                    me.connection().mark_as_lost();
                }
            }
            Message::Resign { reason } => {
                tracing::info!(player = name, ?reason, "opponent resigned");
                break;
            }
        }
    }
    score
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => DEFAULT_PORT,
    };
    let config = CommunicatorConfig {
        receive_timeout_secs: 4,
        ping_interval_secs: 1,
        ..CommunicatorConfig::default()
    };

    let stop = CancelSource::new();
    let host_conn = TcpConnection::new();
    let guest_conn = TcpConnection::new();
    let policies = [
        tokio::spawn(keep_connected(
            Role::Host,
            host_conn.clone(),
            port,
            stop.token(),
        )),
        tokio::spawn(keep_connected(
            Role::Guest,
            guest_conn.clone(),
            port,
            stop.token(),
        )),
    ];

    let mut host = Communicator::new(config.clone().into(), host_conn);
    let mut guest = Communicator::new(config.into(), guest_conn);
    tracing::info!(port, "match starting");

    let (host_score, guest_score) = tokio::join!(
        play(&host, "host", true, None),
        play(&guest, "guest", false, Some(3)),
    );
    tracing::info!(host_score, guest_score, "match over");

    stop.cancel();
    guest.close().await;
    host.close().await;
    for policy in policies {
        policy.await?;
    }
    Ok(())
}
