//! Byte-transparent duplex forwarding.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Which side ended a relayed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    Client,
    Backend,
}

impl std::fmt::Display for ClosedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClosedBy::Client => write!(f, "client"),
            ClosedBy::Backend => write!(f, "backend"),
        }
    }
}

/// Summary of a finished relay.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RelayStats {
    pub closed_by: ClosedBy,
    pub to_backend: u64,
    pub to_client: u64,
}

/// Forward bytes both ways until either side closes or errors, then shut
/// both sides down. Half-open forwarding never outlives the first close.
pub(crate) async fn relay<C, B>(client: C, backend: B) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rx, mut client_tx) = tokio::io::split(client);
    let (mut backend_rx, mut backend_tx) = tokio::io::split(backend);

    let mut to_backend = 0u64;
    let mut to_client = 0u64;

    let closed_by = {
        let upstream = copy_counted(&mut client_rx, &mut backend_tx, &mut to_backend);
        let downstream = copy_counted(&mut backend_rx, &mut client_tx, &mut to_client);
        tokio::select! {
            _ = upstream => ClosedBy::Client,
            _ = downstream => ClosedBy::Backend,
        }
    };

    let _ = client_tx.shutdown().await;
    let _ = backend_tx.shutdown().await;

    RelayStats {
        closed_by,
        to_backend,
        to_client,
    }
}

async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, counter: &mut u64)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        if writer.write_all(&buf[..n]).await.is_err() {
            return;
        }
        if writer.flush().await.is_err() {
            return;
        }
        *counter += n as u64;
    }
}
