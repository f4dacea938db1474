//! Channels back to the forwarding peer
//!
//! Each local connection accepted on a forwarded socket is carried to the
//! peer over a new `forwarded-streamlocal@openssh.com` channel.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use russh::server::{Handle, Msg};
use russh::ChannelId;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use burrow_protocol::FORWARDED_STREAMLOCAL;

/// Failure to open a channel to the peer
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The peer refused the channel or the session is gone
    #[error("forwarded channel open failed: {0}")]
    Open(String),
}

/// Opens forwarded channels on one connection
#[async_trait]
pub trait Tunnel: Clone + Send + Sync + 'static {
    /// Byte stream of an open channel
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open a channel whose payload names `socket_path`
    async fn open_forwarded_streamlocal(
        &self,
        socket_path: &str,
    ) -> Result<Self::Stream, TunnelError>;
}

/// Tunnel over a live russh server session
#[derive(Clone)]
pub struct SessionTunnel {
    handle: Handle,
}

impl SessionTunnel {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl Tunnel for SessionTunnel {
    type Stream = ForwardedChannel;

    async fn open_forwarded_streamlocal(
        &self,
        socket_path: &str,
    ) -> Result<Self::Stream, TunnelError> {
        let channel = self
            .handle
            .channel_open_forwarded_streamlocal(socket_path)
            .await
            .map_err(|e| TunnelError::Open(format!("{} {:?}: {}", FORWARDED_STREAMLOCAL, socket_path, e)))?;

        let id = channel.id();
        Ok(ForwardedChannel {
            stream: Box::pin(channel.into_stream()),
            handle: self.handle.clone(),
            id,
        })
    }
}

/// An open forwarded channel, closed when dropped
pub struct ForwardedChannel {
    stream: Pin<Box<russh::ChannelStream<Msg>>>,
    handle: Handle,
    id: ChannelId,
}

impl AsyncRead for ForwardedChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for ForwardedChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.stream.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_shutdown(cx)
    }
}

impl Drop for ForwardedChannel {
    fn drop(&mut self) {
        let handle = self.handle.clone();
        let id = self.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = handle.close(id).await;
            });
        }
    }
}
