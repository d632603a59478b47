//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in omapdb.
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types (U32, U64).
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::U32;
//!
//! #[repr(C)]
//! struct NodeHeader {
//!     depth: U32,
//!     entry_count: U32,
//! }
//!
//! impl NodeHeader {
//!     zerocopy_accessors! {
//!         depth: u32,
//!         entry_count: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn depth(&self) -> u32 { self.depth.get() }
//! // pub fn set_depth(&mut self, val: u32) { self.depth = U32::new(val); }
//! // ...
//! ```
//!
//! ## corrupt!
//!
//! Builds an `OmapError::CorruptTree` with a formatted reason, for the
//! structural-invariant failure paths of the node layout and tree walk.

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::little_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}

/// Builds an [`OmapError::CorruptTree`](crate::error::OmapError::CorruptTree)
/// with a formatted reason.
#[macro_export]
macro_rules! corrupt {
    ($($arg:tt)*) => {
        $crate::error::OmapError::CorruptTree {
            reason: format!($($arg)*),
        }
    };
}
