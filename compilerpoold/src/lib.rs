// SPDX-License-Identifier: MIT
// compilerpoold: compile-and-run daemon for short Java programs
//
// - Accepts source code over HTTP and runs it through a bounded worker pool.
// - Every job gets a scratch directory from a fixed set that is reused.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod config;
pub mod entry_point;
pub mod error;
pub mod http_api;
pub mod job;
pub mod pipeline;
pub mod scratch;
pub mod toolchain;
pub mod worker_pool;
