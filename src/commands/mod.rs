mod episodes;
mod newsletters;

pub use episodes::*;
pub use newsletters::*;
