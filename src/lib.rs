pub mod error;
pub mod models;
pub mod schema;
pub mod contract;
pub mod parsers;
pub mod identity;
pub mod auth;
pub mod requirements;
pub mod pairing;  // Owner eligibility and attacker pairing
pub mod synthesizer;
pub mod engine;
pub mod verdict;
pub mod progress;
pub mod runner;
pub mod reporting;

// Re-export commonly used items
pub use error::*;
pub use models::*;
pub use schema::Schema;
pub use contract::{Contract, ContractParser};
pub use parsers::*;
pub use identity::*;
pub use auth::*;
pub use requirements::*;
pub use pairing::*;
pub use synthesizer::BodySynthesizer;
pub use engine::*;
pub use verdict::*;
pub use progress::*;
pub use runner::*;
pub use reporting::*;
