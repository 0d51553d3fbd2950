//! TCP stream transport.
//!
//! Connects straight to a simulation listening on a socket. Access is
//! granted locally, endpoints come from resolving the configured address,
//! and a launch opens one framed connection split into a reader and a
//! writer task.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use simlink_core::transport::{AccessGrant, Endpoint, SIGNAL_CHANNEL_CAPACITY};
use simlink_core::{
    ChannelEmitter, LaunchTarget, SimCodec, SimlinkError, StreamHandles, StreamStatus,
    StreamingTransport, TransportSignal,
};

/// [`StreamingTransport`] over a plain TCP socket.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    address: String,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl StreamingTransport for TcpTransport {
    async fn request_access(&mut self, target: &LaunchTarget) -> Result<AccessGrant, SimlinkError> {
        if self.address.trim().is_empty() {
            return Err(SimlinkError::AccessRejected("no simulation address".into()));
        }
        Ok(AccessGrant {
            token: format!("{}/{}", target.project_id, target.model_id),
        })
    }

    async fn fetch_endpoints(&mut self, _grant: &AccessGrant) -> Result<Vec<Endpoint>, SimlinkError> {
        let resolved = tokio::time::timeout(self.timeout, tokio::net::lookup_host(&self.address))
            .await
            .map_err(|_| SimlinkError::Timeout(self.timeout))??;
        Ok(resolved
            .enumerate()
            .map(|(i, addr)| Endpoint {
                id: format!("tcp-{i}"),
                address: addr.to_string(),
            })
            .collect())
    }

    async fn launch(
        &mut self,
        endpoint: &Endpoint,
        target: &LaunchTarget,
    ) -> Result<StreamHandles, SimlinkError> {
        info!(
            endpoint = %endpoint.address,
            project = %target.project_id,
            model = %target.model_id,
            "connecting to simulation"
        );
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&endpoint.address))
            .await
            .map_err(|_| SimlinkError::Timeout(self.timeout))??;
        stream.set_nodelay(true)?;
        Ok(spawn_stream(stream))
    }
}

/// Frame `stream` and split it into session handles.
///
/// The reader reports `Connected` first, then one `Message` per line, and
/// finally `Closed` on end of stream or `Failed` on a read error. Both tasks
/// stop once the handles are dropped, which closes the stream.
pub fn spawn_stream<S>(stream: S) -> StreamHandles
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut net_writer, mut net_reader) = Framed::new(stream, SimCodec::new()).split();

    // Session -> Network
    let (emit_tx, mut emit_rx) = mpsc::unbounded_channel::<String>();

    // Network -> Session
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        while let Some(line) = emit_rx.recv().await {
            if let Err(e) = net_writer.send(line).await {
                warn!(error = %e, "stream write failed");
                break;
            }
        }
        debug!("writer stopped");
    });

    tokio::spawn(async move {
        if signal_tx
            .send(TransportSignal::Status(StreamStatus::Connected))
            .await
            .is_err()
        {
            return;
        }
        let last = loop {
            let next = tokio::select! {
                next = net_reader.next() => next,
                // Session dropped the handles.
                _ = signal_tx.closed() => return,
            };
            match next {
                Some(Ok(line)) => {
                    if signal_tx.send(TransportSignal::Message(line)).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) => break StreamStatus::Failed(e.to_string()),
                None => break StreamStatus::Closed,
            }
        };
        debug!(status = %last, "reader stopped");
        let _ = signal_tx.send(TransportSignal::Status(last)).await;
    });

    StreamHandles {
        emitter: Box::new(ChannelEmitter::new(emit_tx)),
        inbound: signal_rx,
    }
}

// ── Tests ────────────────────────────────────────────────────────
