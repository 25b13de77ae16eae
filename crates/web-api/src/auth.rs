//! JWT 认证模块
//!
//! 令牌携带 `{userId, username}`，可选的 `exp` 存在时才校验过期。
//! 令牌从 `token` cookie 读取，回退到 `Authorization: Bearer`。

use application::{AuthError, PrincipalVerifier};
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use config::JwtConfig;
use domain::{Principal, UserId};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

const TOKEN_COOKIE: &str = "token";

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        let mut validation = Validation::default();
        validation.required_spec_claims.clear();

        Self {
            config,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    /// 为某个用户签发 token
    pub fn generate_token(&self, principal: &Principal) -> Result<String, AuthError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);
        let claims = Claims {
            user_id: principal.user_id.into(),
            username: principal.username.clone(),
            exp: Some(exp.timestamp()),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| AuthError::Invalid(format!("token generation failed: {err}")))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(err.to_string()),
            })
    }
}

impl PrincipalVerifier for JwtService {
    fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let claims = self.verify_token(token)?;
        Ok(Principal::new(UserId::from(claims.user_id), claims.username))
    }
}

/// 先找 `token` cookie，再找 Bearer 头
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
    })
}

/// 已认证的调用者
#[derive(Debug, Clone)]
pub struct AuthUser(pub Principal);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        let principal = state.verifier.verify(&token).map_err(|err| {
            tracing::debug!(error = %err, "rejected request token");
            err
        })?;
        Ok(AuthUser(principal))
    }
}
