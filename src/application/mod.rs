// Application layer - use cases over the account aggregate.
// Every mutating use case is: find (scoped to the owner) -> mutate -> save.

pub mod error;
pub mod service;

pub use error::*;
pub use service::*;
