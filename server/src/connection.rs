//! Connection handling: the accept loop and the per-socket reader and
//! writer tasks.
//!
//! Each TCP connection gets one reader task and one writer task. The
//! reader frames inbound lines, charges them against the connection's
//! rate budgets, decodes them and forwards the commands to the world
//! model's event queue. The writer drains a bounded outbox, coalescing
//! whatever is queued into a single write. Socket tasks never touch world
//! state; the model is the single consumer of the event queue and the
//! only place commands take effect.

use crate::limiter::RateLimiter;
use log::{debug, error, warn};
use shared::{rate_category, Command, Packet, RateCategory};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Duration};

/// Position updates allowed per `POSITION_PER` seconds.
pub const POSITION_RATE: f64 = 100.0;
pub const POSITION_PER: f64 = 5.0;
/// All other frames allowed per `GENERAL_PER` seconds.
pub const GENERAL_RATE: f64 = 1000.0;
pub const GENERAL_PER: f64 = 10.0;

/// How long the writer blocks on an empty outbox before looping.
const OUTBOX_WAIT: Duration = Duration::from_secs(5);

/// Internal routing identifier for a connection. Unlike the client ids
/// handed out on the wire, these are never reused.
pub type ConnId = u64;

/// Everything the world model hears about. One queue, one consumer.
#[derive(Debug)]
pub enum Event {
    Connect {
        conn: ConnId,
        handle: ConnectionHandle,
    },
    Command {
        conn: ConnId,
        command: Command,
    },
    Disconnect {
        conn: ConnId,
    },
    Shutdown,
}

/// The model's side of a connection: a bounded outbox feeding the writer
/// task, plus a stop signal shared with both socket tasks.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub addr: SocketAddr,
    outbox: mpsc::Sender<String>,
    stop: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    pub fn send(&self, packet: &Packet) {
        self.send_raw(packet.encode());
    }

    /// Queues one or more already-encoded frames. A client whose outbox is
    /// full is not keeping up, and gets dropped rather than letting its
    /// backlog grow without bound.
    pub fn send_raw(&self, frames: String) {
        if frames.is_empty() {
            return;
        }
        match self.outbox.try_send(frames) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbox full for {}, dropping connection", self.addr);
                self.stop();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Tells both socket tasks to shut the connection down.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// Accepts connections forever, wiring up the socket tasks for each.
pub async fn accept_loop(
    listener: TcpListener,
    events: mpsc::UnboundedSender<Event>,
    rate_limit: bool,
    outbox_capacity: usize,
) {
    let mut next_conn: ConnId = 0;
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                next_conn += 1;
                let _ = stream.set_nodelay(true);
                debug!("accepted connection {} from {}", next_conn, addr);
                spawn_connection(
                    next_conn,
                    stream,
                    addr,
                    events.clone(),
                    rate_limit,
                    outbox_capacity,
                );
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
                sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Spawns the reader and writer tasks for one socket and announces the
/// connection to the model. The `Connect` event is queued before the
/// reader starts, so the model always sees it before any command from the
/// same connection.
pub fn spawn_connection(
    conn: ConnId,
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<Event>,
    rate_limit: bool,
    outbox_capacity: usize,
) {
    let (outbox_tx, outbox_rx) = mpsc::channel(outbox_capacity);
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop = Arc::new(stop_tx);
    let handle = ConnectionHandle {
        addr,
        outbox: outbox_tx,
        stop: stop.clone(),
    };
    if events.send(Event::Connect { conn, handle }).is_err() {
        return; // model is gone, nothing to serve
    }
    let (read_half, write_half) = stream.into_split();
    tokio::spawn(write_loop(write_half, outbox_rx, stop.clone(), stop_rx.clone()));
    tokio::spawn(read_loop(conn, read_half, events, rate_limit, stop, stop_rx));
}

/// Reads frames until EOF, a socket error, a stop signal or an exhausted
/// rate budget, then reports the disconnect. Malformed frames are dropped;
/// empty lines are ignored.
async fn read_loop<R>(
    conn: ConnId,
    reader: R,
    events: mpsc::UnboundedSender<Event>,
    rate_limit: bool,
    stop: Arc<watch::Sender<bool>>,
    mut stop_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut position_limiter = RateLimiter::new(POSITION_RATE, POSITION_PER, rate_limit);
    let mut general_limiter = RateLimiter::new(GENERAL_RATE, GENERAL_PER, rate_limit);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            read = reader.read_line(&mut line) => read,
            _ = stop_rx.changed() => break,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("read error on connection {}: {}", conn, e);
                break;
            }
        }
        let frame = trim_newline(&line);
        if frame.is_empty() {
            continue;
        }
        let allowed = match rate_category(frame) {
            RateCategory::Position => position_limiter.check(),
            RateCategory::General => general_limiter.check(),
        };
        if !allowed {
            warn!("connection {} exceeded its rate budget, closing", conn);
            let _ = stop.send(true);
            break;
        }
        match Command::decode(frame) {
            Some(command) => {
                if events.send(Event::Command { conn, command }).is_err() {
                    break;
                }
            }
            None => debug!("dropping malformed frame on connection {}: {:?}", conn, frame),
        }
    }
    let _ = events.send(Event::Disconnect { conn });
}

/// Drains the outbox until it closes or the connection is stopped, waking
/// every few seconds when idle. Frames that pile up between writes go out
/// as a single coalesced write.
async fn write_loop<W>(
    mut writer: W,
    mut outbox: mpsc::Receiver<String>,
    stop: Arc<watch::Sender<bool>>,
    mut stop_rx: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            received = timeout(OUTBOX_WAIT, outbox.recv()) => match received {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => continue,
            },
            _ = stop_rx.changed() => break,
        };
        let mut buffer = first;
        while let Ok(frame) = outbox.try_recv() {
            buffer.push_str(&frame);
        }
        if let Err(e) = writer.write_all(buffer.as_bytes()).await {
            debug!("write error: {}", e);
            let _ = stop.send(true);
            break;
        }
    }
}

/// Strips one trailing newline, tolerating CRLF line endings.
fn trim_newline(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
impl ConnectionHandle {
    /// Handle wired to an in-process receiver instead of socket tasks.
    pub(crate) fn test_pair(
        capacity: usize,
    ) -> (ConnectionHandle, mpsc::Receiver<String>, watch::Receiver<bool>) {
        let (outbox_tx, outbox_rx) = mpsc::channel(capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = ConnectionHandle {
            addr: "127.0.0.1:0".parse().unwrap(),
            outbox: outbox_tx,
            stop: Arc::new(stop_tx),
        };
        (handle, outbox_rx, stop_rx)
    }
}
