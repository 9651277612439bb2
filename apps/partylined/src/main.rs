use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use chatproto::command::{self, ServerCommand};
use chatproto::wire;
use partyio::{LineReader, encode_line};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{Level, info, warn};

mod registry;

use registry::Registry;

const DEFAULT_PORT: u16 = 5555;

fn usage_and_exit() -> ! {
    eprintln!(
        "partylined (chat server)\n\n\
USAGE:\n  partylined [PORT]\n\n\
ENV:\n  PARTYLINE_HOST  bind address, default 0.0.0.0\n\n\
Port defaults to 5555 if absent or unparseable.\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    host: String,
    port: u16,
}

fn parse_args() -> Config {
    let host = std::env::var("PARTYLINE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let mut port = DEFAULT_PORT;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => usage_and_exit(),
            v => match v.parse::<u16>() {
                Ok(p) => port = p,
                Err(_) => {
                    display(&format!("invalid port {v:?}, using default {DEFAULT_PORT}"));
                    port = DEFAULT_PORT;
                }
            },
        }
    }

    Config { host, port }
}

/// Local operator echo, distinct from tracing diagnostics.
fn display(msg: &str) {
    println!("> {msg}");
}

/// A running accept loop. Stopping only stops accepting; open
/// connections are untouched.
struct Listener {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl Listener {
    async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

async fn start_listener(
    host: &str,
    port: u16,
    registry: Arc<Registry>,
) -> anyhow::Result<Listener> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("bind {host}:{port}"))?;
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                res = listener.accept() => match res {
                    Ok((stream, peer)) => {
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            let (rd, wr) = stream.into_split();
                            if let Err(e) = handle_conn(rd, wr, peer, registry).await {
                                warn!(peer = %peer, err = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(err = %e, "accept failed"),
                },
                _ = stop_rx.changed() => break,
            }
        }
    });

    Ok(Listener { stop_tx, task })
}

/// One worker per connection: writer task fed over a channel, line loop
/// enforcing the login handshake, then routing.
///
/// Generic over the stream halves so the whole session protocol is
/// exercisable over an in-memory duplex in tests.
async fn handle_conn<R, W>(
    rd: R,
    mut wr: W,
    peer: SocketAddr,
    registry: Arc<Registry>,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (write_tx, mut write_rx) = mpsc::channel::<Bytes>(64);
    let (disconnect_tx, mut disconnect_rx) = watch::channel(false);

    // A failed send is connection-fatal: no retry, no buffering. The
    // writer trips the disconnect watch so the read loop stops too.
    let writer_disconnect = disconnect_tx.clone();
    tokio::spawn(async move {
        while let Some(b) = write_rx.recv().await {
            if wr.write_all(&b[..]).await.is_err() {
                let _ = writer_disconnect.send(true);
                break;
            }
        }
    });

    let conn = registry
        .register(peer, write_tx.clone(), disconnect_tx)
        .await;
    info!(conn = %conn, peer = %peer, "client connected");

    let mut lines = LineReader::new(rd);
    let mut identity: Option<String> = None;
    let mut kicked = false;
    let mut read_err: Option<std::io::Error> = None;

    loop {
        let next = tokio::select! {
            res = lines.next_line() => res,
            _ = disconnect_rx.changed() => {
                kicked = true;
                break;
            }
        };
        let line = match next {
            Ok(Some(b)) => String::from_utf8_lossy(&b).into_owned(),
            Ok(None) => break,
            Err(e) => {
                read_err = Some(e);
                break;
            }
        };

        match &identity {
            // Pre-login: the first leg must be the handshake.
            None => match wire::parse_login(&line) {
                Some(id) if id.is_empty() => {
                    let _ = write_tx.send(encode_line(wire::ERR_EMPTY_LOGIN)).await;
                    break;
                }
                Some(id) => {
                    if registry.set_identity(conn, id).await.is_err() {
                        let _ = write_tx.send(encode_line(wire::ERR_DUPLICATE_LOGIN)).await;
                        break;
                    }
                    identity = Some(id.to_string());
                    info!(conn = %conn, id = %id, "logged on");
                    registry.broadcast(&wire::logon_notice(id)).await;
                }
                None => {
                    let _ = write_tx.send(encode_line(wire::ERR_LOGIN_FIRST)).await;
                    break;
                }
            },
            Some(name) => {
                if wire::parse_login(&line).is_some() {
                    // Identity is immutable once set.
                    let _ = write_tx.send(encode_line(wire::ERR_DUPLICATE_LOGIN)).await;
                    break;
                }
                if wire::is_command(&line) {
                    // Remote peers never drive the operator grammar.
                    let word = line.split_whitespace().next().unwrap_or("#");
                    let _ = write_tx
                        .send(encode_line(&wire::unknown_command_notice(word)))
                        .await;
                    continue;
                }
                info!(conn = %conn, id = %name, msg = %line, "message received");
                registry.broadcast(&wire::chat_line(name, &line)).await;
            }
        }
    }

    registry.unregister(conn).await;
    if let Some(name) = identity {
        if kicked {
            info!(conn = %conn, id = %name, "closed by operator");
        } else {
            info!(conn = %conn, id = %name, "disconnected");
            registry.broadcast(&wire::disconnect_notice(&name)).await;
        }
    }
    // Dropping our write_tx (the registry's clone is gone too) lets the
    // writer drain any queued notice and exit.
    match read_err {
        Some(e) => Err(e).context("read"),
        None => Ok(()),
    }
}

struct ServerState {
    host: String,
    port: u16,
    registry: Arc<Registry>,
    listener: Option<Listener>,
}

async fn run_command(state: &mut ServerState, cmd: ServerCommand) {
    match cmd {
        ServerCommand::Quit => {
            display("quitting.");
            std::process::exit(0);
        }
        ServerCommand::Stop => match state.listener.take() {
            Some(l) => {
                l.stop().await;
                info!(port = state.port, "stopped listening");
                display("stopped listening for new connections.");
            }
            None => display("not listening."),
        },
        ServerCommand::Close => {
            if let Some(l) = state.listener.take() {
                l.stop().await;
            }
            for id in state.registry.identities().await {
                state.registry.broadcast(&wire::logoff_notice(&id)).await;
            }
            state.registry.close_all().await;
            info!("closed all connections");
            display("stopped listening and closed all connections.");
        }
        ServerCommand::SetPort(port) => {
            if state.listener.is_some() {
                display("cannot set port while listening. #stop first.");
            } else {
                state.port = port;
                display(&format!("port set to {port}."));
            }
        }
        ServerCommand::Start => {
            if state.listener.is_some() {
                display("already listening.");
                return;
            }
            match start_listener(&state.host, state.port, state.registry.clone()).await {
                Ok(l) => {
                    state.listener = Some(l);
                    info!(host = %state.host, port = state.port, "listening");
                    display(&format!("listening for connections on port {}.", state.port));
                }
                Err(e) => display(&format!("cannot listen: {e:#}")),
            }
        }
        ServerCommand::GetPort => display(&format!("current port: {}", state.port)),
    }
}

/// Operator console: `#` lines are commands, anything else is broadcast
/// verbatim under the fixed server tag.
async fn console_loop(state: &mut ServerState) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if wire::is_command(line) {
            match command::resolve(command::SERVER_COMMANDS, line) {
                Ok(cmd) => run_command(state, cmd).await,
                Err(e) => display(&e.to_string()),
            }
        } else {
            let msg = wire::server_line(line);
            state.registry.broadcast(&msg).await;
            display(&msg);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,partylined=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();
    let mut state = ServerState {
        host: cfg.host,
        port: cfg.port,
        registry: Arc::new(Registry::new()),
        listener: None,
    };

    match start_listener(&state.host, state.port, state.registry.clone()).await {
        Ok(l) => {
            state.listener = Some(l);
            info!(host = %state.host, port = state.port, "listening");
            display(&format!("listening for connections on port {}.", state.port));
        }
        // The console still works; the operator can #setport / #start.
        Err(e) => display(&format!("cannot listen: {e:#}")),
    }

    console_loop(&mut state).await?;
    info!("console closed, shutting down");
    Ok(())
}
