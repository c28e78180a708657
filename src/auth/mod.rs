//! Single-operator authentication: one embedded credential pair, opaque
//! session tokens with a fixed lifetime, everything in memory.

mod session;

pub use session::{SessionService, DEFAULT_SESSION_TTL};
