pub mod common;
pub mod criteria;
pub mod instance;
pub mod params;
pub mod query;
pub mod schema;
pub mod spatial;

pub use common::*;
pub use criteria::*;
pub use instance::*;
pub use params::*;
pub use query::*;
pub use schema::*;
pub use spatial::*;
