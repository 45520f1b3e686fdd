//! Branching story/task tree tied to an ongoing conversation.
//!
//! The crate keeps a per-context forest of story nodes, resolves which node
//! is currently active, re-synchronizes completion state when the
//! conversation shrinks, and can auto-advance the tree by asking an external
//! text-generation oracle whether the current node was satisfied by the
//! latest exchange. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (store, resolution, rollback,
//!   reply parsing, outline parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (persistence, oracle backends,
//!   prompt rendering, config). Isolated to enable scripting in tests.
//!
//! The [`engine`] module coordinates core logic with I/O and is the surface
//! view/CLI collaborators talk to.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
