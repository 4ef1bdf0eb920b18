//! Optimistic mutations with per-action rollback.

mod action;
mod list;

pub use action::{OptimisticAction, OptimisticItem};
pub use list::{MutationOptions, OptimisticList, OptimisticState};

#[cfg(test)]
pub(crate) use action::testing;
