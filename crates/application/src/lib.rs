#![forbid(unsafe_code)]

pub mod packet_pipeline;
pub mod rule_set_service_impl;
pub mod snapshot;
pub mod table_chain;
