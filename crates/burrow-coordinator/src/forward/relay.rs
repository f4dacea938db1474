//! Full-duplex byte relay between a local connection and a peer channel

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Whether `err` is an ordinary end of one side of the relay
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

/// Bytes moved in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub to_peer: u64,
    pub to_local: u64,
}

/// Relay bytes between `local` and `peer` until either side finishes
///
/// Whichever direction ends first, by EOF or by error, ends the other and
/// both streams are dropped. `cancel` ends the relay from outside. The
/// first error seen is returned after both directions have stopped.
pub async fn relay<L, P>(local: L, peer: P, cancel: CancellationToken) -> io::Result<RelayStats>
where
    L: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    P: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (local_rx, local_tx) = tokio::io::split(local);
    let (peer_rx, peer_tx) = tokio::io::split(peer);
    let done = cancel.child_token();

    let upstream = tokio::spawn(pipe(local_rx, peer_tx, done.clone()));
    let downstream = tokio::spawn(pipe(peer_rx, local_tx, done));

    let (up, down) = tokio::join!(upstream, downstream);
    let up = up.map_err(io::Error::other)?;
    let down = down.map_err(io::Error::other)?;

    Ok(RelayStats {
        to_peer: up?,
        to_local: down?,
    })
}

async fn pipe<R, W>(mut reader: R, mut writer: W, done: CancellationToken) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 32 * 1024];
    let mut total = 0u64;

    let result = loop {
        let n = tokio::select! {
            _ = done.cancelled() => break Ok(total),
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Ok(total),
                Ok(n) => n,
                Err(e) => break Err(e),
            },
        };

        let written = tokio::select! {
            _ = done.cancelled() => break Ok(total),
            written = writer.write_all(&buf[..n]) => written,
        };
        if let Err(e) = written {
            break Err(e);
        }
        total += n as u64;
    };

    done.cancel();
    let _ = writer.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_disconnect_classification() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::NotConnected,
        ] {
            assert!(is_disconnect(&io::Error::from(kind)));
        }
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_disconnect(&io::Error::other("boom")));
    }

    #[tokio::test]
    async fn test_relays_both_directions() {
        let (local, mut local_far) = tokio::io::duplex(1024);
        let (peer, mut peer_far) = tokio::io::duplex(1024);
        let task = tokio::spawn(relay(local, peer, CancellationToken::new()));

        local_far.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        peer_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer_far.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        local_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(local_far);
        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats, RelayStats { to_peer: 4, to_local: 5 });
    }

    #[tokio::test]
    async fn test_one_side_closing_closes_the_other() {
        let (local, local_far) = tokio::io::duplex(1024);
        let (peer, mut peer_far) = tokio::io::duplex(1024);
        let task = tokio::spawn(relay(local, peer, CancellationToken::new()));

        drop(local_far);

        // the peer side sees EOF once the relay tears down
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), peer_far.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_relay() {
        let (local, mut local_far) = tokio::io::duplex(1024);
        let (peer, _peer_far) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(relay(local, peer, cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let mut rest = Vec::new();
        local_far.read_to_end(&mut rest).await.unwrap();
    }
}
