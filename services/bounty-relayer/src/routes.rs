// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The status endpoint: worker liveness over plain HTTP, monitor events
//! over a websocket. Purely observational, the relayer never waits on it.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::service::ServiceHandle;

/// Setup and build all the web services and handlers.
pub fn build_web_services(handle: ServiceHandle) -> Router {
    Router::new()
        .route("/api/v1/status", get(handle_status))
        .route("/api/v1/ws", get(handle_socket_upgrade))
        .with_state(Arc::new(handle))
}

/// Reports which chain workers are alive.
async fn handle_status(
    State(handle): State<Arc<ServiceHandle>>,
) -> impl IntoResponse {
    let statuses = handle.statuses.read().await.clone();
    Json(statuses)
}

async fn handle_socket_upgrade(
    ws: WebSocketUpgrade,
    State(handle): State<Arc<ServiceHandle>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, handle))
}

/// Pushes worker statuses and monitor events to one subscriber until it
/// hangs up.
async fn handle_socket(mut socket: WebSocket, handle: Arc<ServiceHandle>) {
    let mut monitor = handle.monitor.subscribe();
    // greet the subscriber with the current worker statuses.
    let statuses = handle.statuses.read().await.clone();
    let greeting = serde_json::json!(statuses);
    if socket
        .send(Message::Text(greeting.to_string()))
        .await
        .is_err()
    {
        return;
    }
    loop {
        tokio::select! {
            event = monitor.recv() => {
                match event {
                    Ok(event) => {
                        let message = serde_json::json!({
                            "event": "monitor",
                            "data": event,
                        });
                        if socket
                            .send(Message::Text(message.to_string()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    // lagging subscribers just miss a few events.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        continue;
                    }
                    Err(_) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // drain pings and client chatter.
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}
