pub mod error;
pub mod ids;
pub mod memory;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{SessionId, TurnId};
pub use memory::TurnLog;
pub use types::{NewTurn, Turn, TurnRole};
