//! Typed errors for tree store operations and classification.

use thiserror::Error;

use crate::tree::NodeId;

/// Errors surfaced by the tree store, importer, and oracle boundary.
///
/// `NotFound` and `InvalidReference` are returned to the caller with no
/// partial mutation applied. `OracleFailure` is caught at the classifier
/// boundary and logged as a non-fatal warning. `MalformedImport` aborts the
/// entire import.
#[derive(Error, Debug)]
pub enum TreeError {
    /// No node with this id (or no node of the required kind) exists.
    #[error("node {0} not found")]
    NotFound(NodeId),

    /// A jump target or branch reference names a node that does not exist.
    #[error("invalid reference: node {0} does not exist")]
    InvalidReference(NodeId),

    /// The classification round trip to the generation oracle failed.
    #[error("oracle failure: {0}")]
    OracleFailure(String),

    /// Import payload is not shaped as an array of nodes.
    #[error("malformed import: {0}")]
    MalformedImport(String),
}
