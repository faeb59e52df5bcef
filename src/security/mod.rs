//! Master password, session and secret-field encryption

pub mod credentials;
pub mod crypto;
pub mod session;

pub use credentials::CredentialService;
pub use session::{Clock, ManualClock, SessionManager, SessionState, SystemClock};
