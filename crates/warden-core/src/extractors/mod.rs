pub mod client;
pub mod json;
pub mod session;

pub use json::Json;
pub use session::{Authenticated, CurrentContext};
