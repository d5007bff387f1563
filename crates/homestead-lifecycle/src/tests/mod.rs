//! Crate-level lifecycle scenarios driven through a scripted executor.

pub(crate) mod support;
