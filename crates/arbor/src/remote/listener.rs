//! Inbound side of the transport.
//!
//! Every accepted connection is served by its own task that reads frames in a
//! loop and delivers them one after another, so frames arriving on one
//! connection are delivered in the order they were written.

use crate::actor_ref::ActorRef;
use crate::error::TransportError;
use crate::path::RemoteAddress;
use crate::remote::codec::{decode_body, read_frame};
use crate::system::SystemShared;
use bytes::Bytes;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

pub(crate) struct Listener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Listener {
    pub(crate) async fn bind(
        system: &Arc<SystemShared>,
        host: &str,
        port: u16,
    ) -> Result<Listener, TransportError> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::downgrade(system),
            system.config.max_frame_size,
            signal,
        ));
        info!(address = %local_addr, "Remote listener started");
        Ok(Listener {
            local_addr,
            shutdown,
            task,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes every inbound connection.
    pub(crate) async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Listener task ended abnormally");
        }
        info!(address = %self.local_addr, "Remote listener stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    system: Weak<SystemShared>,
    max_frame_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Inbound connection");
                    let _ = stream.set_nodelay(true);
                    connections.spawn(serve(stream, peer, system.clone(), max_frame_size, shutdown.clone()));
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            },
            // Reap finished connection tasks as we go.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    while connections.join_next().await.is_some() {}
}

async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    system: Weak<SystemShared>,
    max_frame_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(stream);
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = read_frame(&mut reader, max_frame_size) => frame,
        };
        let body = match frame {
            Ok(Some(body)) => body,
            Ok(None) => {
                debug!(peer = %peer, "Peer closed the connection");
                break;
            }
            Err(TransportError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!(peer = %peer, "Connection dropped");
                break;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Unreadable frame, closing connection");
                break;
            }
        };
        let Some(system) = system.upgrade() else {
            break;
        };
        if let Err(e) = deliver(&system, body).await {
            warn!(peer = %peer, error = %e, "Dropping inbound frame");
        }
    }
}

/// Decodes one frame body and hands the payload to the local target.
async fn deliver(system: &Arc<SystemShared>, body: Bytes) -> Result<(), TransportError> {
    let envelope = decode_body(body)?;
    let payload = system.codec.decode(&envelope.payload)?;

    let target = match RemoteAddress::parse(&envelope.target) {
        Ok(address) if address.system == system.config.name => system.resolve(&address.path).await,
        Ok(address) => {
            warn!(target = %envelope.target, system = %address.system, "Frame for another system");
            ActorRef::new_dead_letter(envelope.target.clone(), Arc::downgrade(system))
        }
        Err(_) => system.resolve(&envelope.target).await,
    };
    let sender = match envelope.sender {
        Some(sender) => Some(system.resolve(&sender).await),
        None => None,
    };

    debug!(target = %target, message = payload.type_name(), "Inbound message");
    target.tell_payload(payload, sender);
    Ok(())
}
