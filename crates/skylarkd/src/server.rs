//! Chunk servers — TCP listeners accepting relay connections.
//!
//! Each server runs one accept loop; every accepted connection gets its own
//! task running the receive loop, so a slow peer never stalls the listener.

use std::io;
use std::net::{IpAddr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::chunk::receive::{receive_loop, ReceiveContext};

const LISTEN_BACKLOG: i32 = 1024;

pub struct ChunkServer {
    port: u16,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ChunkServer {
    /// Bind an ephemeral port on `host` and start accepting.
    pub fn start(host: &str, socket_buffer: usize, ctx: ReceiveContext) -> io::Result<Self> {
        let listener = bind_listener(host, socket_buffer)?;
        let port = listener.local_addr()?.port();
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, port, ctx, stopped));
        tracing::info!(port, host, "chunk server listening");
        Ok(Self { port, stop, task })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting. Connections already accepted run to completion.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

fn bind_listener(host: &str, socket_buffer: usize) -> io::Result<TcpListener> {
    let ip: IpAddr = host.parse().map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("bind host {host:?}: {e}"))
    })?;
    let addr = SocketAddr::new(ip, 0);

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if socket_buffer > 0 {
        socket.set_recv_buffer_size(socket_buffer)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

async fn accept_loop(
    listener: TcpListener,
    port: u16,
    ctx: ReceiveContext,
    mut stopped: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stopped => {
                tracing::info!(port, "chunk server stopped");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    tracing::debug!(port, %peer, "relay connection accepted");
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        match receive_loop(stream, peer, ctx).await {
                            Ok(chunks) => tracing::debug!(port, %peer, chunks, "relay connection done"),
                            Err(e) => tracing::warn!(port, %peer, error = %e, "relay connection dropped"),
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(port, error = %e, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        }
    }
}
