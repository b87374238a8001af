// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Bounded Compile Worker Pool
//!
//! ## Overview
//! A fixed number of worker threads fed by one bounded FIFO queue.
//!
//! - Callers submit jobs with a deadline; a full queue makes them wait, and an
//!   elapsed deadline rejects the job before it ever occupies a worker.
//! - Each worker drives its own loop on a `LocalPool` in a dedicated thread.
//! - A worker checks the job's cancellation signal right after dequeuing it. A
//!   cancelled job is answered without touching scratch directories or the
//!   toolchain.
//! - Results travel back over a per-job oneshot channel. If the caller is gone
//!   the send is a no-op.
//! - Shutdown closes the queue, lets the workers drain it, and waits on a
//!   countdown until the last worker has exited.
//!
//! ```text
//!         +--------------------------------------+
//!         |     submit(request, deadline)        |
//!         +------------------+-------------------+
//!                            |
//!                            v
//!         +--------------------------------------+
//!         |  bounded admission queue (Q slots)   |
//!         +----+-------------+-------------+-----+
//!              |             |             |
//!         +----v----+   +----v----+   +----v----+
//!         | worker 0|   | worker 1|   |worker W-1|
//!         | loop()  |   | loop()  |   | loop()  |
//!         +----+----+   +----+----+   +----+----+
//!              |             |             |
//!              v             v             v
//!         scratch pool + toolchain, then oneshot reply
//! ```

pub mod countdown;
pub mod pool;

pub use pool::{PoolSettings, PoolStats, WorkerPool};
