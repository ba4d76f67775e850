//! Shared utilities: hashing, filesystem helpers, `${name}` templates.

pub mod fs;
pub mod hash;
pub mod template;

#[cfg(test)]
pub mod testutil;
