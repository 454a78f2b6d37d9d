//! Bridges a client socket to the provider's audio stream.

use crate::{handlers::ApiError, provider::ProviderStream, state::AppState};
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    pub provider_session_id: Option<String>,
}

/// Axum handler that proxies a client socket to the provider's stream.
///
/// The upstream stream is opened before the upgrade is accepted, so a
/// provider failure is answered as a plain HTTP error carrying its code and
/// the client never sees a socket that is not backed by a live session.
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Result<Response, ApiError> {
    let provider_session_id = params
        .provider_session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("providerSessionId is required".to_string()))?;
    let upstream = state
        .provider
        .open_stream(&provider_session_id)
        .await
        .map_err(ApiError::from)?;
    Ok(ws.on_upgrade(move |socket| bridge(socket, upstream, provider_session_id)))
}

#[instrument(name = "stream_proxy", skip(client, upstream))]
async fn bridge(client: WebSocket, upstream: ProviderStream, provider_session_id: String) {
    info!("Client stream bridged to provider");

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    loop {
        tokio::select! {
            message = client_rx.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if upstream_tx.send(WsMessage::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if upstream_tx.send(WsMessage::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Client closed the stream");
                    let _ = upstream_tx.send(WsMessage::Close(None)).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Client stream error");
                    let _ = upstream_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            message = upstream_rx.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    if client_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    if client_tx.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("Provider closed the stream");
                    let _ = client_tx.send(Message::Close(None)).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Provider stream error");
                    let _ = client_tx.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }
    info!("Stream proxy finished");
}
