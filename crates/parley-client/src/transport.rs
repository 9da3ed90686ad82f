//! Hub transports.
//!
//! A [`Connector`] performs one handshake and hands back a [`Session`]: a
//! pair of channels. The transport runs in its own tasks; the session's
//! inbound channel closing is the only closure signal the controller needs.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use parley_shared::constants::DEVICE_NAME_HEADER;
use parley_shared::{ClientFrame, ServerFrame};

use crate::error::ClientError;

const CHANNEL_CAPACITY: usize = 64;

/// Everything a handshake carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub url: String,
    pub token: Option<String>,
    pub device_name: String,
}

/// One live link to the hub.
pub struct Session {
    pub outbound: mpsc::Sender<ClientFrame>,
    pub inbound: mpsc::Receiver<ServerFrame>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, request: &HandshakeRequest) -> Result<Session, ClientError>;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, request: &HandshakeRequest) -> Result<Session, ClientError> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::InvalidConfig(format!("hub url: {e}")))?;

        let headers = ws_request.headers_mut();
        if let Some(token) = &request.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::InvalidConfig("token is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let device_header = HeaderName::from_bytes(DEVICE_NAME_HEADER.as_bytes())
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        let device_value = HeaderValue::from_str(&request.device_name)
            .map_err(|_| ClientError::InvalidConfig("device name is not a valid header value".into()))?;
        headers.insert(device_header, device_value);

        let (stream, _) = tokio_tungstenite::connect_async(ws_request)
            .await
            .map_err(handshake_error)?;
        debug!(url = %request.url, "hub websocket open");

        let (mut ws_tx, mut ws_rx) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<ServerFrame>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode client frame");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %e, "hub websocket error");
                        break;
                    }
                };
                match ServerFrame::from_json(&text) {
                    Ok(frame) => {
                        if in_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable server frame"),
                }
            }
            debug!("hub websocket reader finished");
        });

        Ok(Session {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

fn handshake_error(err: tungstenite::Error) -> ClientError {
    match err {
        tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
            ClientError::Unauthorized("hub refused the token".into())
        }
        other => ClientError::Handshake(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parley_shared::{HubEvent, HubRequest};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::http::StatusCode;

    fn request(addr: std::net::SocketAddr, token: Option<&str>) -> HandshakeRequest {
        HandshakeRequest {
            url: format!("ws://{addr}/hub"),
            token: token.map(String::from),
            device_name: "Work Laptop".into(),
        }
    }

    #[tokio::test]
    async fn handshake_carries_token_and_device_name() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (headers_tx, headers_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| {
                let header = |name: &str| {
                    req.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(String::from)
                };
                let _ = headers_tx.send((header("authorization"), header("device-name")));
                Ok::<_, ErrorResponse>(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();

            let event = ServerFrame::Event(HubEvent::AccessDenied {
                reason: "primary only".into(),
            });
            ws.send(Message::Text(event.to_json().unwrap())).await.unwrap();

            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let frame = ClientFrame::from_json(&text).unwrap();
                    assert_eq!(frame.id, 42);
                    break;
                }
            }
        });

        let mut session = WsConnector.open(&request(addr, Some("tok"))).await.unwrap();
        let (auth, device) = headers_rx.await.unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer tok"));
        assert_eq!(device.as_deref(), Some("Work Laptop"));

        let frame = tokio::time::timeout(Duration::from_secs(5), session.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, ServerFrame::Event(HubEvent::AccessDenied { .. })));

        session
            .outbound
            .send(ClientFrame {
                id: 42,
                request: HubRequest::GetUserChats,
            })
            .await
            .unwrap();

        // The server hangs up after reading the frame; the inbound side closes.
        let closed = tokio::time::timeout(Duration::from_secs(5), session.inbound.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn refused_token_is_not_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
                let mut refusal = ErrorResponse::new(Some("Invalid or expired token".into()));
                *refusal.status_mut() = StatusCode::UNAUTHORIZED;
                Err(refusal)
            };
            let _ = tokio_tungstenite::accept_hdr_async(stream, callback).await;
        });

        match WsConnector.open(&request(addr, Some("stale"))).await {
            Err(err @ ClientError::Unauthorized(_)) => assert!(!err.is_retryable()),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("handshake should fail"),
        }
    }

    #[tokio::test]
    async fn unreachable_hub_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WsConnector.open(&request(addr, None)).await.err().unwrap();
        assert!(matches!(err, ClientError::Handshake(_)));
        assert!(err.is_retryable());
    }
}
