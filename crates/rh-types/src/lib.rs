pub mod dataset;
pub mod errors;
pub mod job;
pub mod round;

pub use dataset::*;
pub use errors::*;
pub use job::*;
pub use round::*;
