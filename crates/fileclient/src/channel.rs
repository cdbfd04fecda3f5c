//! The persistent request/reply channel to the master.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use quill_wire::{WireCodec, WireValue};

use crate::error::ClientError;

/// One framed transport to the master. Strict request/reply: a single
/// exchange is in flight at any time, enforced by the exclusive borrow
/// in [`MasterChannel::exchange`].
pub struct MasterChannel<T> {
    framed: Framed<T, WireCodec>,
    timeout: Duration,
}

impl MasterChannel<TcpStream> {
    /// Connect to the configured master address.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        debug!(addr, "connected to master");
        Ok(Self::from_transport(stream, timeout))
    }
}

impl<T> MasterChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-connected transport. This is the seam tests use to
    /// run a fake master over an in-process duplex pipe.
    pub fn from_transport(transport: T, timeout: Duration) -> Self {
        Self {
            framed: Framed::new(transport, WireCodec),
            timeout,
        }
    }

    /// Send one request and block until its reply arrives. A zero timeout
    /// waits forever.
    pub async fn exchange(&mut self, request: WireValue) -> Result<WireValue, ClientError> {
        self.framed.send(request).await?;

        let reply = if self.timeout.is_zero() {
            self.framed.next().await
        } else {
            tokio::time::timeout(self.timeout, self.framed.next())
                .await
                .map_err(|_| {
                    ClientError::Timeout(format!(
                        "no reply from master within {}s",
                        self.timeout.as_secs()
                    ))
                })?
        };

        match reply {
            Some(value) => Ok(value?),
            None => Err(ClientError::Protocol(
                "master closed the channel mid-exchange".into(),
            )),
        }
    }
}
