// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod run_compilerpoold;
pub mod shell_toolchain;
