//! Shared types for the Lode session history system.

mod gem;
mod session;

pub use gem::*;
pub use session::*;
