//! Core data types shared by every process.

pub mod order;
pub mod symbol;
pub mod tick;

pub use order::*;
pub use symbol::*;
pub use tick::*;
