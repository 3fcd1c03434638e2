// SPDX-License-Identifier: MIT

pub mod fake_oci;
pub mod fake_runtime;
