/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod args;
pub mod avb;
pub mod completion;
pub mod convert;
pub mod region;

/// Print a highlighted progress message to stdout, separate from log output.
macro_rules! status {
    ($($arg:tt)*) => {
        println!("\x1b[1m[*] {}\x1b[0m", format_args!($($arg)*))
    }
}

/// Same as [`status!`], but for conditions the user probably needs to act on.
macro_rules! warning {
    ($($arg:tt)*) => {
        println!("\x1b[1;31m[!] {}\x1b[0m", format_args!($($arg)*))
    }
}

pub(crate) use status;
pub(crate) use warning;
