// SPDX-License-Identifier: MIT
//
// The podbatch entry point, built inside this crate so the CLI tests can
// locate it next to fake-oci.

use std::process::ExitCode;

fn main() -> ExitCode {
    podbatch::cli::main()
}
