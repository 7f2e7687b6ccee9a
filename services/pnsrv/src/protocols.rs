//! Protocol implementations

pub mod profinet;
