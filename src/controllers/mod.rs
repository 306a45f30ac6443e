/*
* File: src/controllers/mod.rs
*
* One reconciler module per custom resource, following the teacher's
* `controllers/` layout. This operator manages a single kind, so the module
* only re-exports `reconcile`'s public surface for `main.rs` to wire into a
* `kube_runtime::Controller`.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod reconcile;

pub use reconcile::{on_error, Context, Error};
