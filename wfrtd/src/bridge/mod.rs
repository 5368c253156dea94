//! Query and mutation documents over the data store.

pub mod executor;
pub mod filters;
pub mod mutator;
pub mod parser;

pub use executor::{execute, FieldError, QueryEnv, QueryOutcome};
pub use mutator::{Mutation, MutationError};
