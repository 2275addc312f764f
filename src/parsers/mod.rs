pub mod openapi;

pub use openapi::{load_contract, OpenApiParser};
