use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::{Actor, Role};
use crate::state::AppState;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Identity asserted by the upstream authentication layer.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(&parts.headers, ACTOR_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|_| AppError::Unauthorized(format!("malformed {ACTOR_ID_HEADER} header")))?;
        let role: Role = header(&parts.headers, ACTOR_ROLE_HEADER)?.parse()?;
        Ok(Actor { id, role })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))
}

/// Per-request cancellation. The token is a child of the server shutdown
/// token and is cancelled when the handler future is dropped.
pub struct RequestCancel {
    token: CancellationToken,
    _guard: DropGuard,
}

impl RequestCancel {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestCancel {
    type Rejection = AppError;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = state.shutdown.child_token();
        let _guard = token.clone().drop_guard();
        Ok(Self { token, _guard })
    }
}
