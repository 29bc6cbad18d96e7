//! Property store: typed, dirty-tracked value cells.
//!
//! A [`Property`] holds raw bytes plus a lazily decoded typed view. A
//! [`PropertySet`] layers instance-owned properties over a shared
//! [`PropertyTemplate`] of type defaults.
//!
//! # Invariants
//! - Writing bytes identical to the current value is a no-op: the dirty bit
//!   does not flip and the write reports no change.
//! - A default is promoted to an instance-owned copy at most once per id and
//!   is never shared again afterwards.
//! - Reading an undeclared property id is a programmer error and panics.

mod property;
mod set;

pub use property::{Color, Property, PropertyError, PropertyId, PropertyKind, PropertyValue};
pub use set::{PropertySet, PropertyTemplate};

pub fn crate_info() -> &'static str {
    "worldcache-property v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("property"));
    }
}
