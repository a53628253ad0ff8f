pub mod query;
pub mod trade;

pub use query::*;
pub use trade::*;
