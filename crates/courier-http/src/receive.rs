//! HTTP inbox: decode a posted message and dispatch it to a receiver.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::post,
    Router,
};
use courier_core::{Context, Delivery, Message, Receiver};
use tracing::warn;

struct ReceiveState {
    receiver: Arc<Receiver>,
    queue: String,
}

/// Builds a router that accepts `POST /` with a message JSON body.
///
/// Deliveries are dispatched with `attempt = 1`; a failing handler maps to
/// `500` regardless of whether it asked for a retry, since retrying is the
/// HTTP caller's concern. Malformed bodies map to `400`, messages without a
/// registered handler to `404`.
pub fn receive_router(receiver: Arc<Receiver>, queue: impl Into<String>) -> Router {
    let state = Arc::new(ReceiveState { receiver, queue: queue.into() });
    Router::new().route("/", post(receive)).with_state(state)
}

async fn receive(State(state): State<Arc<ReceiveState>>, body: Bytes) -> StatusCode {
    let message = match Message::decode(&body) {
        Ok(message) => message,
        Err(error) => {
            warn!(error = %error, "rejected malformed message body");
            return StatusCode::BAD_REQUEST;
        },
    };
    let delivery = Delivery { queue: state.queue.clone(), attempt: 1, message };
    match state.receiver.deliver(&Context::new(), delivery).await {
        Ok(Ok(())) => StatusCode::OK,
        Ok(Err(error)) => {
            warn!(error = %error, "handler rejected delivery");
            StatusCode::INTERNAL_SERVER_ERROR
        },
        Err(error) => {
            warn!(error = %error, "no handler for delivery");
            StatusCode::NOT_FOUND
        },
    }
}
