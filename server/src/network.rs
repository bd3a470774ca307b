//! Server network layer: TCP accept loop, per-connection reader and writer
//! tasks, keep-alive and the periodic sweep.

use crate::connection::Connection;
use crate::Lobby;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{commands, Frame, LobbyCodec, Record};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::codec::Framed;

/// Accepts lobby clients and hands their records to the [`Lobby`].
pub struct Server {
    listener: TcpListener,
    lobby: Lobby,
}

impl Server {
    pub async fn bind(addr: &str, lobby: Lobby) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Self { listener, lobby })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    /// Accept loop. Accept errors are logged and retried.
    pub async fn run(self) -> std::io::Result<()> {
        self.spawn_sweeper();
        info!("Server started successfully");

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Could not disable Nagle for {}: {}", addr, e);
            }
            let lobby = self.lobby.clone();
            tokio::spawn(async move {
                serve_connection(lobby, stream, addr).await;
            });
        }
    }

    /// Spawns the task that periodically reconciles the store with the
    /// live connections.
    fn spawn_sweeper(&self) {
        let lobby = self.lobby.clone();
        let period = lobby.timings().sweep_interval();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = lobby.sweep() {
                    error!("Sweep failed: {}", e);
                }
            }
        });
    }
}

/// Drives one client until either side closes.
pub async fn serve_connection(lobby: Lobby, stream: TcpStream, addr: SocketAddr) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let id = lobby.registry().next_id();
    let conn = Arc::new(Connection::new(id, addr, tx));
    if let Some(previous) = lobby.registry().register(Arc::clone(&conn)) {
        warn!("Connection id {} was still registered, replacing", previous.id());
    }
    info!("Connection {} accepted from {}", id, addr);

    let (mut sink, mut stream) = Framed::new(stream, LobbyCodec).split();

    let writer = {
        let conn = Arc::clone(&conn);
        let keepalive = lobby.timings().keepalive_interval();
        tokio::spawn(async move {
            let mut ping = interval(keepalive);
            ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ping.tick().await;

            loop {
                let frame = tokio::select! {
                    _ = conn.closed() => break,
                    frame = rx.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                    _ = ping.tick() => Frame::new(Record::new(commands::PING)),
                };
                if let Err(e) = sink.send(frame).await {
                    warn!("Failed to write to connection {}: {}", conn.id(), e);
                    break;
                }
            }
            conn.close();
        })
    };

    loop {
        tokio::select! {
            _ = conn.closed() => break,
            next = stream.next() => match next {
                Some(Ok(record)) => lobby.handle(&conn, record),
                Some(Err(e)) => {
                    warn!("Protocol error on connection {}: {}", id, e);
                    break;
                }
                None => {
                    debug!("Connection {} closed by peer", id);
                    break;
                }
            },
        }
    }

    conn.close();
    lobby.connection_closed(&conn);
    if let Err(e) = writer.await {
        error!("Writer task of connection {} panicked: {}", id, e);
    }
    info!("Connection {} from {} closed", id, addr);
}
