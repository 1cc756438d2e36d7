pub mod interface_registry;
pub mod table_arena;

pub use interface_registry::InterfaceRegistry;
pub use table_arena::InMemoryClassifier;
