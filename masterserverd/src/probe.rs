use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;

pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Checks whether an announced endpoint accepts connections.
pub trait Prober: Send + Sync + 'static {
    /// Resolves to false on any failure, or once `timeout` has passed.
    fn probe<'a>(&'a self, address: &'a str, port: u16, timeout: Duration) -> ProbeFuture<'a>;
}

/// Opens a TCP connection to the announced endpoint and closes it again.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProber;

impl Prober for TcpProber {
    fn probe<'a>(&'a self, address: &'a str, port: u16, timeout: Duration) -> ProbeFuture<'a> {
        Box::pin(async move {
            // The deadline covers name resolution as well as the connect
            match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
                // Dropping the stream closes it
                Ok(Ok(_stream)) => true,
                Ok(Err(e)) => {
                    tracing::debug!("Probe of {}:{} failed: {}", address, port, e);
                    false
                }
                Err(_) => {
                    tracing::debug!("Probe of {}:{} timed out after {:?}", address, port, timeout);
                    false
                }
            }
        })
    }
}
