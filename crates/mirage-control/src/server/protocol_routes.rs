//! Encrypted machine and Navi endpoints.

use std::future::Future;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use mirage_crypto::{MachineKey, PeerChannel, SecureChannel};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::AppState;
use crate::error::{ControlError, Result};
use crate::protocol::{open_request, seal_response};

/// Header carrying the caller's transport key (`mkey:<hex>`).
pub const MACHINE_KEY_HEADER: &str = "x-mirage-machine-key";

#[derive(Clone, Copy)]
enum Surface {
    Machine,
    Navi,
}

fn open_channel(state: &AppState, headers: &HeaderMap) -> Result<PeerChannel> {
    let raw = headers
        .get(MACHINE_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ControlError::Invalid("missing machine key header".into()))?;
    let peer = MachineKey::parse(raw)?;
    Ok(PeerChannel::establish(&state.server_key, peer)?)
}

/// Open the request frame, run `handle`, and seal its response.
async fn exchange<Req, Resp, F, Fut>(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    handle: F,
) -> Result<Vec<u8>>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: FnOnce(MachineKey, Req) -> Fut,
    Fut: Future<Output = Result<Resp>>,
{
    let channel = open_channel(state, headers)?;
    let req = open_request(&channel, body)?;
    let resp = handle(channel.peer(), req).await?;
    seal_response(&channel, &resp)
}

fn reply(result: Result<Vec<u8>>, surface: Surface) -> Response {
    match result {
        Ok(frame) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            frame,
        )
            .into_response(),
        Err(ControlError::NotFound(what)) if matches!(surface, Surface::Navi) => {
            warn!(%what, "Navi node not found");
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
        Err(e) => {
            warn!(error = %e, "Protocol request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// `POST /machine/register`
pub async fn machine_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = exchange(&state, &headers, &body, |peer, req| {
        state.protocol.register_machine(peer, req)
    })
    .await;
    reply(result, Surface::Machine)
}

/// `POST /machine/map`
pub async fn machine_map(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = exchange(&state, &headers, &body, |peer, req| {
        state.protocol.poll_machine(peer, req)
    })
    .await;
    reply(result, Surface::Machine)
}

/// `POST /navi/register`
pub async fn navi_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = exchange(&state, &headers, &body, |peer, req| {
        state.protocol.register_navi(peer, req)
    })
    .await;
    reply(result, Surface::Navi)
}

/// `POST /navi/poll`
pub async fn navi_poll(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let result = exchange(&state, &headers, &body, |peer, req| {
        state.protocol.navi_trust_list(peer, req)
    })
    .await;
    reply(result, Surface::Navi)
}
