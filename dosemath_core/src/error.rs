use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DoseMathError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    Input(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule has no items")]
    Empty,
    #[error("first schedule item must start at midnight")]
    FirstItemNotMidnight,
    #[error("schedule items must be strictly ascending (item {0})")]
    NotAscending(usize),
    #[error("schedule item {0} starts at or after 24h")]
    OffsetOutOfRange(usize),
    #[error("invalid schedule value at item {0}")]
    InvalidValue(usize),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing basal rate schedule")]
    MissingBasalSchedule,
    #[error("missing insulin sensitivity schedule")]
    MissingSensitivitySchedule,
    #[error("missing target range schedule")]
    MissingTargetSchedule,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
