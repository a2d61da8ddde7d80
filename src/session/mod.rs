//! Token session lifecycle, device binding, persistence, and the backend
//! session registry.

mod device;
mod manager;
mod registry;
mod store;

pub use device::DeviceFingerprint;
pub use manager::{
    AuthError, AuthEvent, REFRESH_THRESHOLD, Session, SessionConfig, SessionManager, SessionUser,
};
pub use registry::{Device, IssuedTokens, ServerSession, SessionRegistry, TokenContext};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError, TokenStore};
