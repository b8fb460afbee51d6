//! TCP protocol between the walk server and game clients.
//!
//! Length-delimited frames, each carrying one JSON-encoded message.

use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::telemetry::TelemetryEvent;

/// Game → server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Recalibrate,
}

/// Server → game
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Telemetry { name: String, event: TelemetryEvent },
    RecalibrateAck,
}

// --- TCP codec helpers ---

pub type MessageStream = Framed<TcpStream, LengthDelimitedCodec>;
pub type MessageSink = SplitSink<MessageStream, Bytes>;

/// Create a framed message stream with length-delimited framing.
pub fn message_stream(stream: TcpStream) -> MessageStream {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(64 * 1024) // 64KB
        .new_codec();
    Framed::new(stream, codec)
}

pub fn encode<T: Serialize>(msg: &T) -> anyhow::Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(msg)?))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Send a serializable message (JSON + length prefix).
pub async fn send_message<T: Serialize>(stream: &mut MessageStream, msg: &T) -> anyhow::Result<()> {
    stream.send(encode(msg)?).await?;
    Ok(())
}

/// Send through the write half of a split stream.
pub async fn send_to_sink<T: Serialize>(sink: &mut MessageSink, msg: &T) -> anyhow::Result<()> {
    sink.send(encode(msg)?).await?;
    Ok(())
}

/// Receive and deserialize a message.
pub async fn recv_message<T: DeserializeOwned>(stream: &mut MessageStream) -> anyhow::Result<T> {
    match stream.next().await {
        Some(Ok(bytes)) => decode(&bytes),
        Some(Err(e)) => Err(e.into()),
        None => Err(anyhow::anyhow!("connection closed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let bytes = encode(&ClientMessage::Recalibrate).unwrap();
        assert_eq!(&bytes[..], b"\"Recalibrate\"");
        let back: ClientMessage = decode(&bytes).unwrap();
        assert_eq!(back, ClientMessage::Recalibrate);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode::<ClientMessage>(b"{\"Shutdown\":null}").is_err());
    }
}
