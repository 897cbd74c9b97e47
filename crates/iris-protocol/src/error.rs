//! Translation error types

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    /// A content block carried a `type` tag the flat-role schema has no mapping for.
    #[error("unsupported content kind: {0}")]
    UnsupportedContentKind(String),

    /// A flat-role message whose role has no block-structured counterpart.
    #[error("role `{0}` cannot be expressed as a block-structured message")]
    UnrepresentableRole(String),
}
