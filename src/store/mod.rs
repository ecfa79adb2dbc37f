pub mod materializer;
pub mod postgres;
pub mod traits;

pub use materializer::*;
pub use postgres::*;
pub use traits::*;
