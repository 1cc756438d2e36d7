pub mod classifier_port;
pub mod interface_port;
pub mod metrics_port;
