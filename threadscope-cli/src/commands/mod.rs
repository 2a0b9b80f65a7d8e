pub mod common;
pub mod instrument;
pub mod scan;
