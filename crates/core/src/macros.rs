// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Macros shared across the workspace.

/// Define a newtype ID wrapper around a `u32` wire value.
///
/// Generates `new()`, `raw()`, `is_valid()`, `Display`, `From<u32>`,
/// and serde implementations. The values `0` (never allocated) and
/// `u32::MAX` (explicit invalid marker) are reserved; allocators start
/// at 1 and `is_valid()` rejects both.
///
/// ```ignore
/// define_id! {
///     /// Doc comment for the ID type.
///     pub struct UserId;
/// }
/// ```
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Marker for "no id"; never allocated.
            pub const INVALID: Self = Self(u32::MAX);

            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u32 {
                self.0
            }

            /// True for ids an allocator can actually hand out.
            pub const fn is_valid(self) -> bool {
                self.0 != 0 && self.0 != u32::MAX
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> u32 {
                id.0
            }
        }
    };
}
