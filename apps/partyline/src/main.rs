use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use bytes::Bytes;
use chatproto::command::{self, ClientCommand, CommandError};
use chatproto::wire;
use partyio::{LineReader, encode_line};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{Level, info};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5555;

fn usage_and_exit() -> ! {
    eprintln!(
        "partyline (chat client)\n\n\
USAGE:\n  partyline <LOGIN_ID> [HOST] [PORT]\n\n\
ENV:\n  PARTYLINE_HOST  default 127.0.0.1\n  PARTYLINE_PORT  default 5555\n\n\
Port defaults to 5555 if absent or unparseable.\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    login_id: String,
    host: String,
    port: u16,
}

fn parse_args() -> Config {
    let mut host = std::env::var("PARTYLINE_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let mut port: u16 = std::env::var("PARTYLINE_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let mut positional = Vec::new();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => usage_and_exit(),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let Some(login_id) = positional.next() else {
        eprintln!("error: no login id specified");
        usage_and_exit();
    };
    if let Some(h) = positional.next() {
        host = h;
    }
    if let Some(p) = positional.next() {
        match p.parse() {
            Ok(p) => port = p,
            Err(_) => display(&format!("invalid port {p:?}, using default {DEFAULT_PORT}")),
        }
    }

    Config {
        login_id,
        host,
        port,
    }
}

/// Local echo, shared shape with the server console.
fn display(msg: &str) {
    println!("> {msg}");
}

/// A live session: writer task fed over a channel, reader task printing
/// everything the server pushes.
struct Connection {
    write_tx: mpsc::Sender<Bytes>,
    /// Set before a deliberate local close so the reader does not
    /// mistake it for the server going away.
    closing: Arc<AtomicBool>,
    reader: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Deliberate close: `#logoff` / `#quit`.
    fn close(self) {
        self.closing.store(true, Ordering::SeqCst);
        self.reader.abort();
        display("connection closed.");
    }
}

/// Open the transport and run the client half of the handshake: the
/// login line goes out before any user traffic is accepted. A failure
/// here leaves no usable session.
async fn connect(cfg: &Config) -> anyhow::Result<Connection> {
    let stream = TcpStream::connect((cfg.host.as_str(), cfg.port))
        .await
        .with_context(|| format!("connect {}:{}", cfg.host, cfg.port))?;
    let (rd, mut wr) = stream.into_split();

    wr.write_all(&encode_line(&wire::login_line(&cfg.login_id))[..])
        .await
        .context("send login")?;

    let closing = Arc::new(AtomicBool::new(false));

    let (write_tx, mut write_rx) = mpsc::channel::<Bytes>(64);
    let writer_closing = closing.clone();
    tokio::spawn(async move {
        while let Some(b) = write_rx.recv().await {
            if wr.write_all(&b[..]).await.is_err() {
                // Send failure is session-fatal, never retried.
                if !writer_closing.load(Ordering::SeqCst) {
                    display("could not send message to server. terminating.");
                    std::process::exit(1);
                }
                break;
            }
        }
    });

    let reader_closing = closing.clone();
    let reader = tokio::spawn(async move {
        let mut lines = LineReader::new(rd);
        loop {
            match lines.next_line().await {
                Ok(Some(b)) => display(&String::from_utf8_lossy(&b)),
                Ok(None) | Err(_) => break,
            }
        }
        if !reader_closing.load(Ordering::SeqCst) {
            display("the server has shut down.");
            std::process::exit(0);
        }
    });

    info!(host = %cfg.host, port = cfg.port, id = %cfg.login_id, "logged in");
    Ok(Connection {
        write_tx,
        closing,
        reader,
    })
}

async fn run_command(cfg: &mut Config, conn: &mut Option<Connection>, cmd: ClientCommand) {
    match cmd {
        ClientCommand::Quit => {
            if let Some(c) = conn.take() {
                c.close();
            }
            display("bye.");
            std::process::exit(0);
        }
        ClientCommand::Logoff => match conn.take() {
            Some(c) => c.close(),
            None => display("not connected."),
        },
        ClientCommand::SetHost(host) => {
            if conn.is_some() {
                display("cannot change host while connected. #logoff first.");
            } else {
                display(&format!("host set to {host}."));
                cfg.host = host;
            }
        }
        ClientCommand::SetPort(port) => {
            if conn.is_some() {
                display("cannot change port while connected. #logoff first.");
            } else {
                cfg.port = port;
                display(&format!("port set to {port}."));
            }
        }
        ClientCommand::Login => {
            if conn.is_some() {
                display("already connected.");
                return;
            }
            match connect(cfg).await {
                Ok(c) => {
                    *conn = Some(c);
                    display(&format!("logged in as {}.", cfg.login_id));
                }
                Err(e) => display(&format!("cannot connect: {e:#}")),
            }
        }
        ClientCommand::GetHost => display(&format!("current host: {}", cfg.host)),
        ClientCommand::GetPort => display(&format!("current port: {}", cfg.port)),
    }
}

/// User console: `#` lines run the client grammar locally; anything else
/// is chat for the server to broadcast.
async fn console_loop(cfg: &mut Config, conn: &mut Option<Connection>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match command::resolve(command::CLIENT_COMMANDS, line) {
            Ok(cmd) => run_command(cfg, conn, cmd).await,
            Err(CommandError::NotACommand) => {
                let sent = match conn {
                    Some(c) => c.write_tx.send(encode_line(line)).await.is_ok(),
                    None => false,
                };
                if !sent {
                    display("could not send message to server. terminating.");
                    std::process::exit(1);
                }
            }
            Err(e) => display(&e.to_string()),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,partyline=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let mut cfg = parse_args();

    // Login is a one-shot precondition for a usable session: a failure
    // at startup terminates the client.
    let mut conn = match connect(&cfg).await {
        Ok(c) => Some(c),
        Err(e) => {
            display(&format!("cannot set up connection: {e:#}. terminating."));
            std::process::exit(1);
        }
    };

    console_loop(&mut cfg, &mut conn).await?;
    if let Some(c) = conn.take() {
        c.close();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_sends_the_login_line_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let cfg = Config {
            login_id: "zed".to_string(),
            host: "127.0.0.1".to_string(),
            port,
        };

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = LineReader::new(stream);
            let first = lines.next_line().await.unwrap().unwrap();
            // Hand the reader back so the socket outlives the assertions;
            // dropping it early would look like a server shutdown.
            (first, lines)
        });

        let conn = connect(&cfg).await.unwrap();
        let (first, _server_side) = accept.await.unwrap();
        assert_eq!(&first[..], b"#login zed");
        conn.close();
    }

    #[tokio::test]
    async fn chat_goes_out_verbatim_after_login() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let cfg = Config {
            login_id: "zed".to_string(),
            host: "127.0.0.1".to_string(),
            port,
        };

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = LineReader::new(stream);
            let login = lines.next_line().await.unwrap().unwrap();
            let chat = lines.next_line().await.unwrap().unwrap();
            (login, chat, lines)
        });

        let conn = connect(&cfg).await.unwrap();
        conn.write_tx
            .send(encode_line("hello there"))
            .await
            .unwrap();
        let (login, chat, _server_side) = accept.await.unwrap();
        assert_eq!(&login[..], b"#login zed");
        assert_eq!(&chat[..], b"hello there");
        conn.close();
    }

    #[tokio::test]
    async fn connect_fails_when_nobody_listens() {
        // Bind-then-drop to get a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let cfg = Config {
            login_id: "zed".to_string(),
            host: "127.0.0.1".to_string(),
            port,
        };
        assert!(connect(&cfg).await.is_err());
    }
}
