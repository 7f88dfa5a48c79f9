//! Certificate storage over a secret backend

mod engine;
mod traits;


pub use engine::{SecretManagerStorage, DEFAULT_PAGE_SIZE, FIXED_TTL};
pub use traits::{CertStorage, KeyInfo};
