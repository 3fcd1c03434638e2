// SPDX-License-Identifier: MIT
// podbatch: stop, kill, pause, unpause or clean up many containers at once,
// running at most --max-workers runtime invocations in parallel.

use std::process::ExitCode;

fn main() -> ExitCode {
    podbatch::cli::main()
}
