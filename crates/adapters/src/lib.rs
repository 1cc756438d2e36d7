#![deny(unsafe_code)]

pub mod classifier;
