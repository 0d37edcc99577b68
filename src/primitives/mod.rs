//! Low-level primitives for the paging layer.
//!
//! Includes the backing-store abstraction and the epoch-based pager built
//! on top of it.

/// Backing stores and their memory mappings.
///
/// A store can be extended and mapped; the pager never shrinks it.
pub mod io;

/// Page-indexed access over a growable memory mapping.
///
/// Mapping epochs, the pager that publishes them, and the per-transaction
/// pin sets that keep superseded epochs alive.
pub mod pager;
