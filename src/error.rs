//! Error taxonomy for structural canvas operations.
//!
//! Everything here is local and synchronous: a rejected request leaves the
//! canvas unchanged and the caller decides whether to retry or ignore.
//! Event handlers never propagate errors across the dispatch boundary;
//! they signal "not consumed" with a boolean instead.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CanvasError {
    /// The proposed tail node has `can_tail == false`.
    #[error("node cannot be the tail of an edge")]
    CannotTail,

    /// The proposed head node has `can_head == false`.
    #[error("node cannot be the head of an edge")]
    CannotHead,

    /// A pointer grab is already held by another item.
    #[error("another item already holds the pointer grab")]
    GrabHeld,

    /// Grabs on hidden items are refused.
    #[error("cannot grab a hidden item")]
    GrabHidden,

    /// The handle refers to an item or edge that no longer exists.
    #[error("stale handle")]
    StaleHandle,

    /// The requested layout strategy was not compiled in.
    #[error("layout strategy not available")]
    LayoutUnsupported,

    /// A drag was started while another drag state was active.
    #[error("a drag is already in progress")]
    DragInProgress,
}
