use crate::AppState;
use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Claims carried by storefront session tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Expiry, seconds since the epoch.
    pub exp: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub id: Uuid,
}

/// Optional authentication. Checkout and order reads work for guests, so a
/// missing, expired or malformed token degrades to a guest request instead
/// of rejecting it.
#[derive(Debug, Clone, Copy)]
pub struct MaybeUser(pub Option<AuthenticatedUser>);

impl MaybeUser {
    pub fn id(&self) -> Option<Uuid> {
        self.0.map(|user| user.id)
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.jwt_secret.as_deref() else {
            return Ok(MaybeUser(None));
        };
        Ok(extract_user(parts, secret))
    }
}

/// Decodes the `Authorization: Bearer` token in `parts`, if any. Any failure
/// along the way yields a guest.
pub fn extract_user(parts: &Parts, secret: &str) -> MaybeUser {
    let Some(token) = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    else {
        return MaybeUser(None);
    };

    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    );

    match decoded {
        Ok(data) => match Uuid::parse_str(&data.claims.sub) {
            Ok(id) => MaybeUser(Some(AuthenticatedUser { id })),
            Err(_) => {
                debug!("token subject is not a user id; treating as guest");
                MaybeUser(None)
            }
        },
        Err(e) => {
            debug!(error = %e, "token rejected; treating as guest");
            MaybeUser(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/orders");
        if let Some(value) = value {
            builder = builder.header(axum::http::header::AUTHORIZATION, value);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        parts
    }

    fn token_for(sub: &str, exp: usize) -> String {
        encode(
            &Header::default(),
            &Claims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_the_user() {
        let user_id = Uuid::new_v4();
        let token = token_for(&user_id.to_string(), 4_000_000_000);
        let parts = parts_with_auth(Some(&format!("Bearer {}", token)));
        assert_eq!(extract_user(&parts, SECRET).id(), Some(user_id));
    }

    #[test]
    fn missing_header_yields_a_guest() {
        let parts = parts_with_auth(None);
        assert_eq!(extract_user(&parts, SECRET).id(), None);
    }

    #[test]
    fn expired_token_yields_a_guest() {
        let token = token_for(&Uuid::new_v4().to_string(), 1_000);
        let parts = parts_with_auth(Some(&format!("Bearer {}", token)));
        assert_eq!(extract_user(&parts, SECRET).id(), None);
    }

    #[test]
    fn garbage_token_yields_a_guest() {
        let parts = parts_with_auth(Some("Bearer not.a.token"));
        assert_eq!(extract_user(&parts, SECRET).id(), None);
    }

    #[test]
    fn non_uuid_subject_yields_a_guest() {
        let token = token_for("admin", 4_000_000_000);
        let parts = parts_with_auth(Some(&format!("Bearer {}", token)));
        assert_eq!(extract_user(&parts, SECRET).id(), None);
    }
}
