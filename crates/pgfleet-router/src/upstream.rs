//! The upstream backend capability set: connect, forward
//! bytes, ping, close. This collapses what the source describes as deep
//! "domain"/"integration" layers into one seam; the only concrete
//! implementation in this workspace is a transparent TCP byte pipe, since
//! parsing the database's wire protocol is an explicit non-goal.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::buffer::IoBufferPool;
use crate::error::RouterError;

/// A database node from the pool's perspective: connect, forward the
/// client's bytes transparently, probe liveness, and close. No component
/// in this crate decodes the body of what is forwarded.
pub trait UpstreamBackend: Send + Sync + 'static {
    fn connect(&self, endpoint: &str) -> impl Future<Output = Result<TcpStream, RouterError>> + Send;

    /// A cheap liveness probe independent of the Health Monitor's
    /// classification: the circuit breaker resets on its own
    /// first successful probe, regardless of what HM reports.
    fn ping(&self, endpoint: &str, timeout: Duration) -> impl Future<Output = bool> + Send;
}

/// The only `UpstreamBackend` this workspace ships: a plain TCP connect and
/// a connect-based liveness check.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpUpstream;

impl UpstreamBackend for TcpUpstream {
    async fn connect(&self, endpoint: &str) -> Result<TcpStream, RouterError> {
        Ok(TcpStream::connect(endpoint).await?)
    }

    async fn ping(&self, endpoint: &str, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(endpoint)).await,
            Ok(Ok(_))
        )
    }
}

/// Bidirectionally forwards bytes between a client stream and an upstream
/// stream until either side closes, `cancel` fires, or neither side has
/// produced a byte for `idle_timeout` (`T_idle`: the pool configuration's
/// idle upstream closure). Reads land in buffers borrowed from `buffers`
/// and returned to it once the session ends, rather than allocated fresh
/// per connection. The body is never inspected.
pub async fn forward(
    client: &mut (impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin),
    upstream: &mut TcpStream,
    buffers: &IoBufferPool,
    mut cancel: tokio::sync::watch::Receiver<bool>,
    idle_timeout: Duration,
) -> Result<(), RouterError> {
    let mut to_upstream = buffers.get();
    let mut to_client = buffers.get();
    let read_len = to_upstream.capacity().max(to_client.capacity());
    to_upstream.resize(read_len, 0);
    to_client.resize(read_len, 0);

    let mut client_open = true;
    let mut upstream_open = true;
    let mut idle_deadline = tokio::time::Instant::now() + idle_timeout;

    let result = loop {
        if !client_open && !upstream_open {
            break Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.changed() => {
                let _ = upstream.shutdown().await;
                break Err(RouterError::TopologyChanged);
            }
            () = tokio::time::sleep_until(idle_deadline) => {
                let _ = client.shutdown().await;
                let _ = upstream.shutdown().await;
                break Err(RouterError::IdleTimeout);
            }
            n = client.read(&mut to_upstream), if client_open => {
                match n {
                    Ok(0) => {
                        let _ = upstream.shutdown().await;
                        client_open = false;
                    }
                    Ok(n) => {
                        idle_deadline = tokio::time::Instant::now() + idle_timeout;
                        if let Err(err) = upstream.write_all(&to_upstream[..n]).await {
                            break Err(err.into());
                        }
                    }
                    Err(err) => break Err(err.into()),
                }
            }
            n = upstream.read(&mut to_client), if upstream_open => {
                match n {
                    Ok(0) => {
                        let _ = client.shutdown().await;
                        upstream_open = false;
                    }
                    Ok(n) => {
                        idle_deadline = tokio::time::Instant::now() + idle_timeout;
                        if let Err(err) = client.write_all(&to_client[..n]).await {
                            break Err(err.into());
                        }
                    }
                    Err(err) => break Err(err.into()),
                }
            }
        }
    };

    buffers.put(to_upstream);
    buffers.put(to_client);
    result
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::sync::watch;

    use super::*;

    #[tokio::test]
    async fn a_connection_idle_past_the_timeout_is_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut upstream = accept.await.unwrap();

        let buffers = IoBufferPool::new(4, 256);
        let (_tx, cancel) = watch::channel(false);

        let result = forward(&mut client, &mut upstream, &buffers, cancel, Duration::from_millis(30)).await;
        assert!(matches!(result, Err(RouterError::IdleTimeout)));
    }
}
