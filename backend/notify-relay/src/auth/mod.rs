/// Handshake authentication
pub mod checksum;

pub use checksum::{AuthError, ChecksumAuthenticator, REPLAY_WINDOW_SECS};
