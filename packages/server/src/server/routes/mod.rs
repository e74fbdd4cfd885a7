// HTTP routes
pub mod drain;
pub mod health;

pub use drain::*;
pub use health::*;
