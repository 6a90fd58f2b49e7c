use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::events::{parse_server_event, ServerEvent};
use super::link::{LinkReceiver, LinkSender};
use super::messages::{ClientMessage, SessionConfig};
use crate::error::VoiceError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket connection to a realtime speech endpoint
pub struct RealtimeClient;

impl RealtimeClient {
    /// Connect, authenticate, and send the session configuration.
    ///
    /// The configuration is the first message on the wire; no audio can be
    /// sent before this returns.
    pub async fn connect(
        url: &str,
        api_key: &str,
        session: SessionConfig,
    ) -> Result<(RealtimeSender, RealtimeReceiver)> {
        info!("Connecting to realtime endpoint {}", url);

        let mut request = url
            .into_client_request()
            .context("Invalid realtime endpoint URL")?;
        let headers = request.headers_mut();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .context("API key is not a valid header value")?,
        );
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .context("Failed to connect to realtime endpoint")?;

        info!("Connected to realtime endpoint");

        let (sink, stream) = ws_stream.split();
        let mut sender = RealtimeSender { sink, closed: false };

        sender
            .send(&ClientMessage::session_update(session))
            .await
            .context("Failed to send session configuration")?;

        info!("Session configuration sent");

        Ok((sender, RealtimeReceiver { stream }))
    }
}

pub struct RealtimeSender {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl LinkSender for RealtimeSender {
    async fn send(&mut self, message: &ClientMessage) -> crate::Result<()> {
        if self.closed {
            return Err(VoiceError::LinkClosed);
        }

        let payload = serde_json::to_string(message)
            .map_err(|e| VoiceError::LinkError(format!("failed to encode {}: {}", message.kind(), e)))?;

        self.sink.send(Message::Text(payload)).await.map_err(|e| {
            self.closed = true;
            transport_error(e)
        })
    }

    async fn close(&mut self) -> crate::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        info!("Closing realtime connection");

        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!("Close frame not sent: {}", e);
        }
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(transport_error(e)),
        }
    }
}

pub struct RealtimeReceiver {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl LinkReceiver for RealtimeReceiver {
    async fn receive(&mut self) -> crate::Result<ServerEvent> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return parse_server_event(&text),
                Some(Ok(Message::Binary(data))) => {
                    let text = String::from_utf8(data)
                        .map_err(|_| VoiceError::LinkError("non UTF-8 binary frame".to_string()))?;
                    return parse_server_event(&text);
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("Remote closed the connection: {:?}", frame);
                    return Err(VoiceError::LinkClosed);
                }
                // Ping/pong and raw frames are handled by the transport
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(transport_error(e)),
                None => return Err(VoiceError::LinkClosed),
            }
        }
    }
}

fn transport_error(e: WsError) -> VoiceError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => VoiceError::LinkClosed,
        other => {
            warn!("Realtime transport fault: {}", other);
            VoiceError::LinkError(other.to_string())
        }
    }
}
