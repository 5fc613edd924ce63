//! An in-memory ordered map built on a B+ tree with doubly linked leaves.
//!
//! This crate provides [`BPlusTreeMap`], an ordered associative container in
//! which every key/value entry lives in a leaf node and internal nodes hold
//! only separator copies for routing. All leaves are threaded into a doubly
//! linked chain in global key order, which makes iteration, reverse iteration,
//! and range scans simple walks along sibling links with no per-step stack.
//!
//! The ordering is supplied by the caller: the map stores a [`TotalOrder`]
//! value and evaluates a single `less(a, b)` relation for every comparison.
//! [`NaturalOrder`] (the default) bridges to [`Ord`], and any
//! `Fn(&K, &K) -> bool` closure works too.
//!
//! # Example
//!
//! ```
//! use leaflink::BPlusTreeMap;
//!
//! let mut inventory = BPlusTreeMap::new();
//! inventory.insert("bolt", 1200);
//! inventory.insert("washer", 800);
//! inventory.insert("nut", 450);
//!
//! // Point lookup, update-on-duplicate, removal.
//! assert_eq!(inventory.insert("nut", 500), Some(450));
//! assert_eq!(inventory.remove(&"washer"), Some(800));
//!
//! // Bounded range scan, in key order.
//! let restock: Vec<_> = inventory.range("a".."z").map(|(name, _)| *name).collect();
//! assert_eq!(restock, ["bolt", "nut"]);
//! ```
//!
//! # Features
//!
//! - **`no_std` compatible** - only requires `alloc`
//! - **Caller-supplied ordering** - a stored [`TotalOrder`] relation instead
//!   of an `Ord` bound on the key type
//! - **Stack-free traversal** - forward/backward iteration and range scans
//!   run entirely in the leaf chain
//! - **Cache-friendly storage** - nodes live contiguously in an arena and
//!   hold many entries each
//!
//! # Implementation
//!
//! Nodes are stored in an arena and addressed by niche-optimized handles; the
//! leaf chain links are plain handles too, so the structure needs no interior
//! mutability and no reference cycles. Insertion splits full nodes on the way
//! down (so splits never propagate back up) and deletion refills minimal
//! nodes on the way down via sibling borrows or merges (so underflows never
//! propagate up either); both are single root-to-leaf passes.

#![no_std]
// These forbid rules and lint groups are meant to be very restrictive.
#![forbid(unsafe_op_in_unsafe_fn)]
#![forbid(keyword_idents)]
#![forbid(non_ascii_idents)]
#![forbid(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::cargo)]
#![warn(clippy::pedantic)]
// Enable coverage attributes for nightly builds.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod order;
mod raw;

pub mod bplus_map;

pub use bplus_map::{BPlusTreeMap, ShapeNode};
pub use order::{NaturalOrder, TotalOrder};
