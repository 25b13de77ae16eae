use domain::Principal;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential token")]
    MissingToken,
    #[error("credential token expired")]
    Expired,
    #[error("invalid credential token: {0}")]
    Invalid(String),
}

/// 把不透明的凭据令牌转换为稳定的用户身份，无状态
pub trait PrincipalVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Principal, AuthError>;
}
