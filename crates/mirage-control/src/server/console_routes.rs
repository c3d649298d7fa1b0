//! Console endpoints. Every response is HTTP 200; failures travel in the body.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::AppState;
use crate::console::types::{
    Envelope, LoginData, LoginRequest, RemoveRequest, RemoveResponse, UpdateRequest,
};
use crate::console::{SESSION_COOKIE, console_message};
use crate::error::Result;
use crate::storage::User;

/// Value of the session cookie, if the request carries one.
fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE).then(|| value.to_string())
        })
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

async fn caller(state: &AppState, headers: &HeaderMap) -> Result<User> {
    state
        .console
        .authenticate(session_token(headers).as_deref())
        .await
}

fn envelope<T: serde::Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(data) => Json(Envelope::ok(data)).into_response(),
        Err(e) => {
            debug!(error = %e, "Console request failed");
            Json(Envelope::<()>::error(console_message(&e))).into_response()
        }
    }
}

/// `POST /console/login`
pub async fn login(State(state): State<AppState>, body: Bytes) -> Response {
    let result = async {
        let req: LoginRequest = parse_body(&body)?;
        state.console.login(&req.username, &req.password).await
    }
    .await;

    match result {
        Ok((token, user)) => {
            let cookie = format!(
                "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
                state.console.session_ttl().as_secs()
            );
            (
                [(header::SET_COOKIE, cookie)],
                Json(Envelope::ok(LoginData {
                    user_id: user.id,
                    display_name: user.display_name,
                })),
            )
                .into_response()
        }
        Err(e) => envelope::<()>(Err(e)),
    }
}

/// `POST /console/logout`
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.console.logout(&token).await;
    }
    let cleared = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0");
    ([(header::SET_COOKIE, cleared)], Json(Envelope::ok(()))).into_response()
}

/// `GET /console/machines`
pub async fn list_machines(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = async {
        let user = caller(&state, &headers).await?;
        state.console.list_machines(&user).await
    }
    .await;
    envelope(result)
}

/// `POST /console/machines/update`
pub async fn update_machine(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let user = caller(&state, &headers).await?;
        let req: UpdateRequest = parse_body(&body)?;
        state.console.update_machine(&user, req).await
    }
    .await;
    envelope(result)
}

/// `POST /console/machines/remove`
pub async fn remove_machine(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let user = caller(&state, &headers).await?;
        let req: RemoveRequest = parse_body(&body)?;
        state.console.remove_machine(&user, &req.mid).await
    }
    .await;

    let reply = match result {
        Ok(()) => RemoveResponse::ok(),
        Err(e) => RemoveResponse::error(console_message(&e)),
    };
    Json(reply).into_response()
}
