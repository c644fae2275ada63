use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::models::UserRole;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,    // User id
    pub role: UserRole, // homeowner | contractor | worker | admin
    pub exp: usize,     // Expiration time
}

/// The authenticated caller, inserted into request extensions by the
/// auth middleware and read back by handlers.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: String,
    pub role: UserRole,
}

pub fn create_token(
    user_id: &str,
    role: UserRole,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

pub fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_subject_and_role() {
        let token = create_token("user-7", UserRole::Contractor, "test-secret").unwrap();
        let claims = validate_token(&token, "test-secret").unwrap();
        assert_eq!(claims.sub, "user-7");
        assert_eq!(claims.role, UserRole::Contractor);
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = create_token("user-7", UserRole::Homeowner, "test-secret").unwrap();
        assert!(validate_token(&token, "other-secret").is_err());
    }
}
