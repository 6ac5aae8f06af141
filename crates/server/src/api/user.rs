//! Diagnostic endpoint echoing the authenticated principal.

use std::collections::BTreeSet;

use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api::auth::{AuthError, BearerAuth};
use crate::oauth2::OAuth2State;
use crate::token::TokenClaims;

pub const USER_TAG: &str = "User";

pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(principal))
        .with_state(state)
}

/// The user and client an access token was issued to.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PrincipalResponse {
    pub name: String,
    pub authorities: BTreeSet<String>,
    pub client_id: String,
    pub scope: BTreeSet<String>,
    pub authenticated: bool,
}

impl From<TokenClaims> for PrincipalResponse {
    fn from(claims: TokenClaims) -> Self {
        Self {
            name: claims.user_name,
            authorities: claims.authorities,
            client_id: claims.client_id,
            scope: claims.scope,
            authenticated: true,
        }
    }
}

/// Current principal
#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "/principal",
    tag = USER_TAG,
    security(("Authorization" = [])),
    responses(
        (status = 200, description = "Authenticated principal", body = PrincipalResponse),
        (status = 401, description = "Missing or invalid access token", body = AuthError)
    )
)]
pub async fn principal(BearerAuth(claims): BearerAuth) -> Json<PrincipalResponse> {
    Json(claims.into())
}
