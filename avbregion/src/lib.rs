/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Since avbregion is primarily an application and not a library, the semver
//! versioning covers the CLI only. All Rust APIs can change at any time, even
//! in patch releases.
//!
//! The parsing and patching functions operate on in-memory image buffers. The
//! only filesystem access outside of the CLI is the temporary files handed to
//! an external [`signer::Signer`].

pub mod cli;
pub mod config;
pub mod escape;
pub mod format;
pub mod info;
pub mod patch;
pub mod signer;
pub mod stream;
pub mod util;
