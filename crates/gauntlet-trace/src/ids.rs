//! Identifier newtypes shared across the workspace
//!
//! ULIDs are used for sortability: node ids created later in a run compare
//! greater than earlier ones, which keeps trace listings chronological.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate a fresh identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(
    /// Unique identifier of an agent run
    RunId
);
ulid_id!(
    /// Unique identifier of a plan step within a run
    StepId
);
ulid_id!(
    /// Unique identifier of a trace node within a run
    NodeId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
        assert_ne!(NodeId::new(), NodeId::new());
    }

    #[test]
    fn later_node_ids_sort_after_earlier_ones() {
        let first = NodeId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = NodeId::new();
        assert!(first < second);
    }
}
