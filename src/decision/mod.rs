pub mod cache;
pub mod store;
pub mod types;

pub use cache::DecisionCache;
pub use store::{DecisionStore, DecisionsFile};
pub use types::{Decision, Kind, Scope, Shape, Verdict};
