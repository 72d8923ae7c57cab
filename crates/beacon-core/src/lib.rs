pub mod token;
pub mod session;
pub mod service;
pub mod health;
pub mod repository;
pub mod errors;
pub mod time;

pub use token::{Claims, Token, TokenType};
pub use session::Session;
pub use service::ServiceRecord;
pub use health::HealthStatus;
pub use repository::{RegistryRepository, SessionRepository};
pub use errors::{RegistryError, SessionError, StorageError, TokenError};
pub use time::{Clock, ManualClock, SystemClock};
