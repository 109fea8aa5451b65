//! Error types for the events crate.

use std::fmt;

/// Errors from parsing a filter condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// The expression was empty or whitespace only.
    Empty,
    /// A quoted string literal was not closed.
    UnterminatedString { position: usize },
    /// A token was not recognized or appeared out of place.
    UnexpectedToken { position: usize, token: String },
    /// The expression ended where another token was required.
    UnexpectedEnd,
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "condition expression is empty"),
            Self::UnterminatedString { position } => {
                write!(f, "unterminated string literal at position {position}")
            }
            Self::UnexpectedToken { position, token } => {
                write!(f, "unexpected token '{token}' at position {position}")
            }
            Self::UnexpectedEnd => write!(f, "condition expression ended unexpectedly"),
        }
    }
}

impl std::error::Error for ConditionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_error_display() {
        let err = ConditionError::UnexpectedToken {
            position: 4,
            token: "~=".to_string(),
        };
        assert!(err.to_string().contains("unexpected token '~='"));
        assert!(err.to_string().contains("position 4"));
    }

    #[test]
    fn unterminated_string_display() {
        let err = ConditionError::UnterminatedString { position: 10 };
        assert!(err.to_string().contains("unterminated string"));
    }
}
