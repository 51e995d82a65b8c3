pub mod crds;
mod option;

pub use option::*;
