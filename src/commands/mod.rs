pub mod docs;
pub mod import;
pub mod stats;
pub mod trades;

pub use docs::*;
pub use import::*;
pub use stats::*;
pub use trades::*;
