//! UDP transport module
//!
//! This module owns the socket, runs the receive loop, and routes frames
//! through the protocol state machine.

mod connection;

pub use self::connection::BroadcastClient;

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::core::{Error, Result};

/// Creates a UDP socket connected to `remote`
///
/// The socket is configured through socket2 so the receive buffer can hold a
/// burst of car updates, then handed over to tokio.
pub(crate) async fn connect_udp(remote: SocketAddr, recv_buffer_size: usize) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(remote), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| Error::socket(format!("Failed to create socket: {}", e)))?;

    if recv_buffer_size > 0 {
        socket
            .set_recv_buffer_size(recv_buffer_size)
            .map_err(|e| Error::socket(format!("Failed to set receive buffer: {}", e)))?;
    }
    socket.set_nonblocking(true)?;

    let local: SocketAddr = match remote {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    };
    socket
        .bind(&local.into())
        .map_err(|e| Error::socket(format!("Failed to bind socket: {}", e)))?;

    let socket = UdpSocket::from_std(socket.into())?;
    socket
        .connect(remote)
        .await
        .map_err(|e| Error::socket(format!("Failed to connect to {}: {}", remote, e)))?;
    Ok(socket)
}
