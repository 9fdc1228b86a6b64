//! WebSocket listener
//!
//! The first path segment of the upgrade request is the credential. Unknown
//! credentials get a plain 404 and never reach the WebSocket handshake.

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use super::router::CommandRouter;
use super::{Gateway, WeakGateway};

/// Serve upgrade requests until the task is aborted
pub(crate) async fn serve(listener: TcpListener, gateway: WeakGateway) {
    let app = Router::new()
        .route("/:credential", get(upgrade))
        .fallback(not_found)
        .with_state(gateway);

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!(%err, "rcon listener failed");
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn upgrade(
    Path(credential): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(gateway): State<WeakGateway>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(gateway) = gateway.upgrade() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    if !gateway.has_endpoint(&credential) {
        tracing::debug!(%remote, "rejected rcon upgrade for unknown endpoint");
        return StatusCode::NOT_FOUND.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, gateway, credential, remote))
}

async fn handle_socket(mut socket: WebSocket, gateway: Gateway, credential: String, remote: SocketAddr) {
    // The endpoint may have been removed between the upgrade check and now.
    let Some((session, mut outbound)) = gateway.open_session(&credential, remote) else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    tracing::info!(%remote, profile = %session.profile(), "rcon connection established");

    let router = CommandRouter::new(gateway.clone());
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Endpoint deregistered or gateway stopped.
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let router = router.clone();
                        let request = session.clone();
                        let routed =
                            tokio::task::spawn_blocking(move || router.route(&request, &text)).await;
                        if let Err(err) = routed {
                            tracing::warn!(%remote, %err, "rcon command handler failed");
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    gateway.close_session(&session);
    tracing::info!(%remote, profile = %session.profile(), "rcon connection closed");
}
