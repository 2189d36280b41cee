pub mod errors;
pub mod id;

pub use errors::{ConfigError, PartyError};
pub use id::{new_correlation_id, new_id, RoomCode};

pub type Result<T> = std::result::Result<T, PartyError>;
