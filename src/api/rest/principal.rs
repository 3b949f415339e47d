use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::models::actor::Actor;

/// Header carrying the principal authenticated upstream, e.g. `driver:<uuid>`.
pub const ACTOR_HEADER: &str = "x-actor";

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| AppError::Unauthenticated(format!("missing {ACTOR_HEADER} header")))?
            .to_str()
            .map_err(|_| AppError::Unauthenticated(format!("{ACTOR_HEADER} is not valid text")))?;

        raw.parse()
    }
}
