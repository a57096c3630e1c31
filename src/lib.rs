//! issuewatch: watch issue trackers for items matching configured criteria
//! and act on every match.
//!
//! A single process polls each configured watch on its own interval, filters
//! candidates through a lazy multi-predicate matcher, and runs the watch's
//! actions concurrently for every match. The configuration file is watched
//! and hot-reloaded; the running poll set is reconciled against each new
//! version.
//!
//! See `DESIGN.md` for the module map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod config_watch;
pub mod logging;

pub mod item;
pub mod matching;
pub mod metrics;

pub mod dispatch;
pub mod reconcile;
pub mod scheduler;

pub mod actions;
pub mod mail;
pub mod source;

pub mod watch;
