//! Shared helpers for host unit tests.

pub(crate) mod support;
