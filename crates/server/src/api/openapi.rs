//! OpenAPI/Utoipa configuration.

use crate::api::{health::MISC_TAG, user::USER_TAG};
use crate::oauth2::OAUTH2_TAG;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{Flow, HttpAuthScheme, HttpBuilder, OAuth2, Password, Scopes, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("JWT")
                .description(Some(
                    "Access token obtained from the `/oauth/token` endpoint.",
                ))
                .build();
            components.add_security_scheme("Authorization", SecurityScheme::Http(bearer));

            let oauth2 = OAuth2::new([Flow::Password(Password::new(
                "/oauth/token",
                Scopes::from_iter([("read", "Read access"), ("write", "Write access")]),
            ))]);
            components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "OAuth2 LDAP Authorization Server",
        version = "1.0.0",
        description = "Issues JWT access tokens to registered clients for users in an LDAP directory."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 authorization server endpoints"),
        (name = USER_TAG, description = "Authenticated user endpoints")
    )
)]
pub struct ApiDoc;
