//! Domain types, key layout and error taxonomy shared by the store and server.

pub mod clock;
pub mod constants;
pub mod error;
pub mod keys;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use types::*;
