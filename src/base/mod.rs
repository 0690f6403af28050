//! Fundamental types shared by the whole crate.

pub mod name;
pub mod rtype;

pub use self::name::{Name, NameError};
pub use self::rtype::{Class, Rtype, Trust, TypePair};
