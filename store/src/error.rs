use error_stack::Report;

/// Errors surfaced by the event store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// Filter or factory criteria are ill-formed. Programmer error; fails
    /// the call before any I/O.
    InvalidCriteria,
    /// An artifact referenced a block or transaction absent from the same
    /// transaction. The transaction rolls back.
    ReferentialViolation,
    /// Concurrent writers kept colliding after the retry budget was spent.
    SerializationConflict,
    /// The connection to the engine failed or was lost.
    Connection,
    /// A statement failed to prepare or execute, or a row failed to decode.
    Query,
}

pub trait EventStoreErrorExt {
    fn is_serialization_conflict(&self) -> bool;
}

impl EventStoreErrorExt for Report<EventStoreError> {
    fn is_serialization_conflict(&self) -> bool {
        matches!(
            self.current_context(),
            EventStoreError::SerializationConflict
        )
    }
}

impl error_stack::Context for EventStoreError {}

impl std::fmt::Display for EventStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventStoreError::InvalidCriteria => {
                write!(f, "event store error: invalid filter criteria")
            }
            EventStoreError::ReferentialViolation => {
                write!(f, "event store error: referential violation")
            }
            EventStoreError::SerializationConflict => {
                write!(f, "event store error: serialization conflict")
            }
            EventStoreError::Connection => {
                write!(f, "event store error: connection failed")
            }
            EventStoreError::Query => {
                write!(f, "event store error: query failed")
            }
        }
    }
}
