/// Reasons a termination request is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("remote termination is disabled (no admin token configured)")]
    Disabled,
    #[error("invalid admin token")]
    Invalid,
}

/// Validates the token a client sent with a termination request against the configured
/// admin token.
///
/// Returns `Ok(())` if the tokens match. With no configured token the command is
/// disabled and every request is refused.
pub fn validate_admin_token(provided: &str, expected: Option<&str>) -> Result<(), AuthError> {
    let expected = expected.ok_or(AuthError::Disabled)?;

    // Compare every byte so the time taken does not depend on where the first mismatch is.
    let matches = provided.len() == expected.len()
        && provided
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0;

    if matches {
        Ok(())
    } else {
        Err(AuthError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_configured_token() {
        assert_eq!(validate_admin_token("anything", None), Err(AuthError::Disabled));
        assert_eq!(validate_admin_token("", None), Err(AuthError::Disabled));
    }

    #[test]
    fn test_matching_token() {
        assert_eq!(validate_admin_token("s3cret", Some("s3cret")), Ok(()));
    }

    #[test]
    fn test_mismatched_token() {
        assert_eq!(
            validate_admin_token("s3creT", Some("s3cret")),
            Err(AuthError::Invalid)
        );
        assert_eq!(
            validate_admin_token("s3cret-longer", Some("s3cret")),
            Err(AuthError::Invalid)
        );
        assert_eq!(validate_admin_token("", Some("s3cret")), Err(AuthError::Invalid));
    }
}
