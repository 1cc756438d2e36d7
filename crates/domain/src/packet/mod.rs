pub mod checksum;
pub mod engine;
pub mod matcher;
pub mod rewriter;
pub mod view;

pub use engine::{Evaluation, match_and_rewrite};
pub use rewriter::Verdict;
pub use view::PacketLayout;
