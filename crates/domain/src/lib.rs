pub mod creation;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod grouping;
pub mod playback;
pub mod ports;
pub mod reconciliation;
pub mod session;
pub mod stories;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
