use anyhow::{Context, Result};
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::RecalibrateHandle;
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::telemetry::{BroadcastSink, NamedEvent};

/// Fans telemetry out to every connected game client and accepts recalibration requests.
pub struct TelemetryServer {
    listener: TcpListener,
    sink: BroadcastSink,
    recalibrate: RecalibrateHandle,
}

impl TelemetryServer {
    pub async fn bind(addr: &str, sink: BroadcastSink, recalibrate: RecalibrateHandle) -> Result<Self> {
        let bind_addr: SocketAddr = addr.parse().context("invalid listen_addr")?;
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", bind_addr))?;
        Ok(Self {
            listener,
            sink,
            recalibrate,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        info!(addr = %self.local_addr()?, "telemetry server listening");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    self.admit(stream, addr, &cancel);
                }
            }
        }
        info!("telemetry server stopped");
        Ok(())
    }

    /// Start a session for one accepted client. A misbehaving socket only
    /// affects its own session.
    fn admit(&self, stream: TcpStream, addr: SocketAddr, cancel: &CancellationToken) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%addr, error = %e, "set_nodelay failed");
        }
        info!(%addr, "client connected");
        let rx = self.sink.subscribe();
        let recalibrate = self.recalibrate.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            match client_session(stream, rx, recalibrate, cancel).await {
                Ok(()) => info!(%addr, "client disconnected"),
                Err(e) => warn!(%addr, error = %e, "client session error"),
            }
        });
    }
}

async fn client_session(
    stream: TcpStream,
    mut events: broadcast::Receiver<NamedEvent>,
    recalibrate: RecalibrateHandle,
    cancel: CancellationToken,
) -> Result<()> {
    let framed = protocol::message_stream(stream);
    let (mut sink, mut reader) = framed.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            incoming = reader.next() => {
                let bytes = match incoming {
                    Some(Ok(b)) => b,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                };
                match protocol::decode::<ClientMessage>(&bytes) {
                    Ok(ClientMessage::Recalibrate) => {
                        info!("recalibration requested by client");
                        recalibrate.trigger();
                        protocol::send_to_sink(&mut sink, &ServerMessage::RecalibrateAck).await?;
                    }
                    Err(e) => debug!(error = %e, "ignoring malformed client message"),
                }
            }
            event = events.recv() => match event {
                Ok(NamedEvent { name, event }) => {
                    protocol::send_to_sink(&mut sink, &ServerMessage::Telemetry { name, event }).await?;
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "client lagging, events dropped"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::telemetry::{TelemetryEvent, TelemetrySink, TelemetryStatus, TELEMETRY_EVENT};
    use std::time::Duration;

    async fn wait_for_subscriber(sink: &BroadcastSink) {
        for _ in 0..200 {
            if sink.subscriber_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("client never subscribed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_telemetry_and_recalibrate_round_trip() {
        let sink = BroadcastSink::new(16);
        let handle = RecalibrateHandle::new();
        let server = TelemetryServer::bind("127.0.0.1:0", sink.clone(), handle.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server_task = tokio::spawn(server.serve(cancel.clone()));

        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut client = protocol::message_stream(tcp);
        wait_for_subscriber(&sink).await;

        let snap = TelemetryEvent::snapshot(&SessionState::default(), 1.0);
        sink.emit(TELEMETRY_EVENT, &snap).unwrap();
        let msg: ServerMessage = protocol::recv_message(&mut client).await.unwrap();
        match msg {
            ServerMessage::Telemetry { name, event } => {
                assert_eq!(name, "telemetry");
                assert_eq!(event.state, TelemetryStatus::Idle);
            }
            other => panic!("unexpected {:?}", other),
        }

        protocol::send_message(&mut client, &ClientMessage::Recalibrate)
            .await
            .unwrap();
        let ack: ServerMessage = protocol::recv_message(&mut client).await.unwrap();
        assert_eq!(ack, ServerMessage::RecalibrateAck);
        assert!(handle.is_pending());

        cancel.cancel();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_outlives_a_dropped_client() {
        let sink = BroadcastSink::new(16);
        let server = TelemetryServer::bind("127.0.0.1:0", sink.clone(), RecalibrateHandle::new())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server_task = tokio::spawn(server.serve(cancel.clone()));

        let first = TcpStream::connect(addr).await.unwrap();
        wait_for_subscriber(&sink).await;
        drop(first);
        for _ in 0..200 {
            if sink.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sink.subscriber_count(), 0);
        assert!(!server_task.is_finished());

        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut second = protocol::message_stream(tcp);
        wait_for_subscriber(&sink).await;

        let snap = TelemetryEvent::snapshot(&SessionState::default(), 0.5);
        sink.emit(TELEMETRY_EVENT, &snap).unwrap();
        let msg: ServerMessage = protocol::recv_message(&mut second).await.unwrap();
        assert!(matches!(msg, ServerMessage::Telemetry { .. }));

        cancel.cancel();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bind_rejects_bad_address() {
        let result = TelemetryServer::bind("not an address", BroadcastSink::new(1), RecalibrateHandle::new()).await;
        assert!(result.is_err());
    }
}
