// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Build script that embeds git version info into the `tether` binary.
//!
//! Produces `TETHER_VERSION` from `git describe --tags --always --dirty`,
//! e.g. `0.4.0`, `0.4.0-3-gabc1234` or `0.4.0-3-gabc1234-dirty`.
//! Falls back to `CARGO_PKG_VERSION` when git is unavailable.

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");

    let version = git_describe().unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    println!("cargo:rustc-env=TETHER_VERSION={version}");
}

fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let desc = String::from_utf8(output.stdout).ok()?;
    let desc = desc.trim();

    if desc.is_empty() {
        return None;
    }

    // Tags are written as v0.4.0
    Some(desc.strip_prefix('v').unwrap_or(desc).to_string())
}
