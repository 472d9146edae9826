//! Per-algorithm lock acquisition and release. Both variants share the
//! list/barrier primitives in `row.rs`; they differ only in how an
//! exclusive acquisition treats the owners list (BAMBOO: singleton, CLV:
//! a list) and in how the wound scan walks it.

pub mod bamboo;
pub mod clv;
