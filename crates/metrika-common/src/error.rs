/// Validation failures for an inbound metric update or query.
///
/// The display strings are part of the wire contract: handlers return them
/// verbatim as plain-text response bodies.
///
/// # Examples
///
/// ```rust
/// use metrika_common::error::MetricError;
///
/// assert_eq!(MetricError::UnknownType.to_string(), "type is invalid or not found");
/// assert!(MetricError::MissingName.is_not_found());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MetricError {
    /// The `type` segment or field is neither `counter` nor `gauge`.
    #[error("type is invalid or not found")]
    UnknownType,

    /// The metric name is empty.
    #[error("name is invalid or not found")]
    MissingName,

    /// The path-encoded value segment is empty.
    #[error("value is invalid or not found")]
    MissingValue,

    /// A counter update carried no parsable integer delta.
    #[error("counter value not found")]
    CounterValue,

    /// A gauge update carried no parsable finite float.
    #[error("gauge value not found")]
    GaugeValue,
}

impl MetricError {
    /// Whether the failure maps to `404 Not Found` rather than `400 Bad Request`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetricError::MissingName)
    }
}

/// Failures while building a [`crate::signature::Signer`].
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature key rejected by cipher")]
    InvalidKey,

    #[error("signature sealing failed")]
    Seal,
}
