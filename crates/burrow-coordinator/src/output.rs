//! Line output of exec commands

use std::io;

use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};

/// Where a command writes its human-readable lines
#[async_trait]
pub trait CommandOutput: Send {
    /// Write one line; a newline is appended
    async fn write_line(&mut self, line: &str) -> io::Result<()>;
}

/// Output written to an SSH session channel
pub struct ChannelOutput {
    handle: Handle,
    channel: ChannelId,
}

impl ChannelOutput {
    pub fn new(handle: Handle, channel: ChannelId) -> Self {
        Self { handle, channel }
    }
}

#[async_trait]
impl CommandOutput for ChannelOutput {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');

        self.handle
            .data(self.channel, CryptoVec::from_slice(&data))
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

/// Write a line, ignoring a peer that has already gone away
pub async fn emit<O: CommandOutput + ?Sized>(out: &mut O, line: &str) {
    if let Err(e) = out.write_line(line).await {
        tracing::debug!("Dropped command output {:?}: {}", line, e);
    }
}

#[cfg(test)]
pub(crate) mod capture {
    use super::*;
    use tokio::sync::mpsc;

    /// Output collected in memory and streamed to the test
    pub struct CapturedOutput {
        pub lines: Vec<String>,
        tx: Option<mpsc::UnboundedSender<String>>,
    }

    impl CapturedOutput {
        pub fn new() -> Self {
            Self {
                lines: Vec::new(),
                tx: None,
            }
        }

        /// Output that also sends every line to the returned receiver
        pub fn streaming() -> (Self, mpsc::UnboundedReceiver<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let out = Self {
                lines: Vec::new(),
                tx: Some(tx),
            };
            (out, rx)
        }

        pub fn text(&self) -> String {
            self.lines.join("\n")
        }
    }

    #[async_trait]
    impl CommandOutput for CapturedOutput {
        async fn write_line(&mut self, line: &str) -> io::Result<()> {
            self.lines.push(line.to_string());
            if let Some(tx) = &self.tx {
                let _ = tx.send(line.to_string());
            }
            Ok(())
        }
    }
}
