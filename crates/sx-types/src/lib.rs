pub mod values;
pub mod errors;

pub use values::*;
pub use errors::*;
