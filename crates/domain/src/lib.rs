#![forbid(unsafe_code)]

pub mod common;
pub mod compiler;
pub mod field;
pub mod packet;
pub mod rule;
pub mod table;
