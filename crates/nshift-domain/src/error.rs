use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid resource identifier: {0}")]
    InvalidResourceIdentifier(String),

    #[error("unknown resource kind tag: {0}")]
    UnknownResourceKind(String),

    #[error("invalid schedule window: {0}")]
    InvalidScheduleWindow(String),

    #[error("invalid day-of-week abbreviation: {0}")]
    InvalidDayOfWeek(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
