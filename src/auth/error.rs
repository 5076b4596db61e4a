use thiserror::Error;

/// Failures surfaced by the session broker.
///
/// Login failures are deliberately coarse: unknown user, wrong password and
/// inactive account all collapse into `InvalidCredentials` so responses do
/// not reveal whether an identifier exists.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("too many attempts, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_stay_generic() {
        assert_eq!(AuthError::InvalidCredentials.to_string(), "invalid credentials");
        let limited = AuthError::RateLimited {
            retry_after_seconds: 90,
        };
        assert_eq!(limited.to_string(), "too many attempts, retry in 90s");
    }
}
