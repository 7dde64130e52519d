use thiserror::Error;

/// Errors produced by credential verification.
///
/// The set is closed on purpose: the gateway maps every variant to the same
/// 401 envelope and must never leak why a credential was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("credential is missing")]
    MissingCredential,

    #[error("credential signature is invalid")]
    InvalidSignature,

    #[error("credential has expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::InvalidSignature,
        }
    }
}
