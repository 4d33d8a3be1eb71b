//! CLI command implementations.
//!
//! Each submodule resolves its inputs through the [`AppContext`], calls one
//! domain operation, and prints through the pure functions in [`format`].
//!
//! [`AppContext`]: crate::context::AppContext

pub mod control;
pub mod down;
pub mod exec;
pub mod format;
pub mod gc;
pub mod monitor;
pub mod net;
pub mod ps;
pub mod up;
