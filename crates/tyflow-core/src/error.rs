//! Hard failures
//!
//! Type mismatches are never reported here: they live in the type graph as
//! error-carrying nodes. `InferError` covers input the engine cannot even
//! represent.

use thiserror::Error;

/// Byte offset into the source text
pub type Pos = usize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferError {
    /// Malformed source text
    #[error("parse error at {pos}: {message}")]
    Parse { message: String, pos: Pos },

    /// Identifier with no binding and no primitive of that name
    #[error("unknown identifier '{name}' at {pos}")]
    Unbound { name: String, pos: Pos },

    /// Surface syntax the engine has no node for
    #[error("unsupported construct '{construct}' at {pos}")]
    Unsupported { construct: String, pos: Pos },
}

impl InferError {
    pub fn parse(message: impl Into<String>, pos: Pos) -> Self {
        InferError::Parse { message: message.into(), pos }
    }

    pub fn pos(&self) -> Pos {
        match self {
            InferError::Parse { pos, .. }
            | InferError::Unbound { pos, .. }
            | InferError::Unsupported { pos, .. } => *pos,
        }
    }
}

pub type Result<T> = std::result::Result<T, InferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e = InferError::parse("expected '}'", 4);
        assert_eq!(e.to_string(), "parse error at 4: expected '}'");
        let e = InferError::Unbound { name: "frob".into(), pos: 1 };
        assert_eq!(e.to_string(), "unknown identifier 'frob' at 1");
        assert_eq!(e.pos(), 1);
    }
}
