use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::Encoder;
use tracing::{debug, info, warn, Instrument};

use crate::core::{ClientConfig, Error, Result, SessionContext, MAX_PACKET_SIZE};
use crate::protocol::{BroadcastEvent, Command, OutboundMessage, ProtocolState};

/// Client connection to a simulator's broadcasting interface
///
/// The receive loop runs on its own task and exclusively owns the socket and
/// the protocol state. Callers talk to it through channels.
pub struct BroadcastClient {
    /// Commands for the receive loop
    command_tx: mpsc::UnboundedSender<Command>,
    /// Signals the receive loop to unregister and stop
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Receive loop task
    task: Option<JoinHandle<Result<()>>>,
    /// Mirrors whether the simulator accepted the registration
    connected: Arc<AtomicBool>,
    /// Local socket address
    local_addr: SocketAddr,
}

impl BroadcastClient {
    /// Connects to the simulator and registers
    ///
    /// Returns the client and the stream of events published by the
    /// receive loop. The stream ends when the loop terminates.
    pub async fn connect(
        config: ClientConfig,
        ctx: SessionContext,
    ) -> Result<(Self, mpsc::UnboundedReceiver<BroadcastEvent>)> {
        config.validate()?;

        let socket = super::connect_udp(config.remote_addr, config.recv_buffer_size).await?;
        let local_addr = socket.local_addr()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let span = tracing::info_span!(
            parent: ctx.span(),
            "broadcast_client",
            remote = %config.remote_addr,
            local = %local_addr
        );

        let mut state = ProtocolState::new(config, ctx, outbound_tx, events_tx);
        state.register()?;

        let connected = Arc::new(AtomicBool::new(false));
        let receive_loop = ReceiveLoop {
            socket,
            state,
            outbound_rx,
            command_rx,
            connected: Arc::clone(&connected),
        };
        let task = tokio::spawn(receive_loop.run(shutdown_rx).instrument(span));

        Ok((
            BroadcastClient {
                command_tx,
                shutdown_tx: Some(shutdown_tx),
                task: Some(task),
                connected,
                local_addr,
            },
            events_rx,
        ))
    }

    /// Queues a command for the simulator
    pub fn send(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::invalid_state("Client is shut down"))
    }

    /// Whether the simulator accepted the registration and the loop is running
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Local socket address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Unregisters, closes the socket and waits for the receive loop
    ///
    /// The first call returns how the loop ended; later calls return `Ok`.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            // The loop may already have exited on its own
            let _ = shutdown_tx.send(());
        }

        let result = match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| Error::socket(format!("Receive loop failed: {}", e)))?,
            None => Ok(()),
        };
        self.connected.store(false, Ordering::Release);
        result
    }

    /// Waits for the receive loop to end on its own and returns how it ended
    ///
    /// The loop ends on socket faults or when registration is given up.
    /// Returns `Ok` if the loop was already awaited.
    pub async fn join(&mut self) -> Result<()> {
        let result = match self.task.as_mut() {
            Some(task) => task
                .await
                .map_err(|e| Error::socket(format!("Receive loop failed: {}", e)))?,
            None => return Ok(()),
        };
        self.task = None;
        self.shutdown_tx = None;
        self.connected.store(false, Ordering::Release);
        result
    }
}

impl Drop for BroadcastClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// State owned by the receive loop task
struct ReceiveLoop {
    socket: UdpSocket,
    state: ProtocolState,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    connected: Arc<AtomicBool>,
}

impl ReceiveLoop {
    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        let mut recv_buffer = BytesMut::with_capacity(MAX_PACKET_SIZE);
        let mut send_buffer = BytesMut::with_capacity(256);

        let result = loop {
            let retry_at = self.state.next_retry();
            recv_buffer.clear();
            recv_buffer.reserve(MAX_PACKET_SIZE);

            tokio::select! {
                // Dropping the client counts as a shutdown request too
                _ = &mut shutdown_rx => {
                    debug!("shutdown requested");
                    break self.unregister(&mut send_buffer).await;
                }

                Some(message) = self.outbound_rx.recv() => {
                    if let Err(e) = self.send(message, &mut send_buffer).await {
                        break Err(e);
                    }
                }

                Some(command) = self.command_rx.recv() => {
                    if let Err(e) = self.state.send_command(command) {
                        warn!(error = %e, "command rejected");
                    }
                }

                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    if let Err(e) = self.state.poll_retry(Instant::now()) {
                        break Err(e);
                    }
                }

                received = self.socket.recv_buf(&mut recv_buffer) => {
                    let len = match received {
                        Ok(len) => len,
                        Err(e) => break Err(Error::socket(format!("Receive failed: {}", e))),
                    };

                    match self.state.handle_datagram(&mut recv_buffer, Instant::now()) {
                        Ok(()) => {}
                        Err(e) if e.is_frame_local() => {
                            warn!(error = %e, len, "dropping malformed frame");
                        }
                        Err(e) => break Err(e),
                    }
                    self.connected.store(self.state.is_connected(), Ordering::Release);
                }
            }
        };

        self.connected.store(false, Ordering::Release);
        match &result {
            Ok(()) => info!("receive loop stopped"),
            Err(e) => warn!(error = %e, "receive loop terminated"),
        }
        result
    }

    /// Sends the unregister request and anything still queued before it
    async fn unregister(&mut self, send_buffer: &mut BytesMut) -> Result<()> {
        self.state.disconnect()?;
        while let Ok(message) = self.outbound_rx.try_recv() {
            self.send(message, send_buffer).await?;
        }
        Ok(())
    }

    async fn send(&mut self, message: OutboundMessage, send_buffer: &mut BytesMut) -> Result<()> {
        let message_type = message.message_type();
        send_buffer.clear();
        self.state.codec_mut().encode(message, send_buffer)?;
        self.socket
            .send(send_buffer)
            .await
            .map_err(|e| Error::socket(format!("Failed to send message {}: {}", message_type, e)))?;
        Ok(())
    }
}
