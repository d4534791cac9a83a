mod account;
mod clock;
mod error;
mod money;
mod transaction;

pub use account::*;
pub use clock::*;
pub use error::*;
pub use money::*;
pub use transaction::*;
