pub mod error;
pub mod types;
pub mod trust_state;
pub mod record;
pub mod config;

pub use config::AuthConfig;
pub use error::CoreError;
pub use record::TrustRecord;
pub use trust_state::{TrustEvent, TrustStateMachine, TrustStatus};
pub use types::PeerId;
