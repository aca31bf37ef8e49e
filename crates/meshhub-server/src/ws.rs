//! WebSocket ↔ byte-stream adapter.
//!
//! The session core consumes plain duplex byte streams; this module pumps
//! an accepted WebSocket's frames byte-for-byte into one side of a
//! `tokio::io::duplex` pair and hands back the other side, keeping the
//! core transport-agnostic.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::debug;

/// Adapt an accepted WebSocket into a duplex byte stream.
///
/// Binary and text frames both feed the stream; outbound bytes leave as
/// binary frames. Dropping either side ends the pump, which ends the
/// session.
pub fn byte_stream(ws: WebSocket, buffer: usize) -> DuplexStream {
    let (stream, mut transport) = tokio::io::duplex(buffer);
    drop(tokio::spawn(async move {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            tokio::select! {
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(Message::Binary(data))) => {
                        if transport.write_all(&data).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if transport.write_all(text.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket error");
                        break;
                    }
                },
                outgoing = transport.read(&mut buf) => match outgoing {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if ws_tx.send(Message::Binary(buf[..n].to_vec().into())).await.is_err() {
                            break;
                        }
                    }
                },
            }
        }
        let _ = ws_tx.close().await;
    }));
    stream
}

// Exercising the adapter needs a real WebSocket, which axum only hands out
// on upgrade; the end-to-end path is covered by tests/integration.rs with a
// tokio-tungstenite client.
