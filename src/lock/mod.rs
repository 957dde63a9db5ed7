// src/lock/mod.rs

//! Entity locking.
//!
//! - [`reference`] defines [`LockObjectReference`], the (kind, id) key a task
//!   declares for every entity it touches, and the [`Lockable`] capability.
//! - [`manager`] holds the engine-wide table of currently held references.
//!   Acquisition is all-or-nothing per task, so two running tasks never share
//!   a reference and no task ever holds a partial set while waiting.

pub mod manager;
pub mod reference;

pub use manager::{LockManager, LockOwner};
pub use reference::{LockObjectReference, LockSet, Lockable, kinds};
