//! TEAM_155: Kernel error handling infrastructure.
//! TEAM_452: Errno mapping for syscall-facing callers.
//!
//! Provides the `define_kernel_error!` macro for consistent error type definitions.
//! Every generated type has a subsystem byte, a stable 16-bit code, a short
//! description, and a negative Linux errno that the syscall layer hands to
//! userspace unchanged.
//!
//! ## Usage
//!
//! ### Simple errors (errno given per variant)
//! ```ignore
//! define_kernel_error! {
//!     pub enum WaitError(0x21) {
//!         PoolExhausted = 0x01 [EAGAIN] => "Wait pool exhausted",
//!     }
//! }
//! ```
//!
//! ### Nested errors (errno forwarded from the inner error)
//! ```ignore
//! define_kernel_error! {
//!     pub enum ProcError(0x20) {
//!         NoMemory = 0x01 [ENOMEM] => "Out of memory",
//!         Wait(WaitError) = 0x02 => "Wait registration failed",
//!     }
//! }
//! ```
//!
//! Inner types must provide `const fn errno(&self) -> i64` and `Display`;
//! every type produced by this macro does, and so does [`Errno`].

#![no_std]

/// TEAM_452: A raw errno propagated unchanged from a collaborator.
///
/// Stored positive (as in `linux-raw-sys`), reported negative by `errno()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub u32);

impl Errno {
    /// Negative errno, ready for a syscall return register.
    pub const fn errno(&self) -> i64 {
        -(self.0 as i64)
    }
}

impl core::fmt::Display for Errno {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

/// Macro to define a kernel error type with consistent handling.
///
/// Supports both simple variants and nested variants containing inner errors.
/// Simple variants name their errno in brackets; nested variants inherit it.
#[macro_export]
macro_rules! define_kernel_error {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident($subsystem:literal) {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $(($inner:ty))? = $code:literal $([$errno:expr])? => $desc:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant $(($inner))?,
            )*
        }

        impl $name {
            /// Subsystem identifier for this error type.
            pub const SUBSYSTEM: u8 = $subsystem;

            /// Get numeric error code for debugging.
            pub const fn code(&self) -> u16 {
                match self {
                    $(
                        $crate::define_kernel_error!(@pattern $variant $(($inner))? _unused) => {
                            (($subsystem as u16) << 8) | $code
                        }
                    )*
                }
            }

            /// Get error name for logging.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(
                        $crate::define_kernel_error!(@pattern $variant $(($inner))? _unused) => {
                            $desc
                        }
                    )*
                }
            }

            /// TEAM_452: Negative errno for the syscall return path.
            pub const fn errno(&self) -> i64 {
                match self {
                    $(
                        $crate::define_kernel_error!(@pattern $variant $(($inner))? inner) => {
                            $crate::define_kernel_error!(@errno_body $(($inner))? $([$errno])? inner)
                        }
                    )*
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self {
                    $(
                        $crate::define_kernel_error!(@pattern $variant $(($inner))? inner) => {
                            $crate::define_kernel_error!(@display_body self f $desc $(($inner))? inner)
                        }
                    )*
                }
            }
        }

        impl core::error::Error for $name {}
    };

    // Helper to generate patterns
    (@pattern $variant:ident ($inner:ty) $bind:ident) => { Self::$variant($bind) };
    (@pattern $variant:ident $bind:ident) => { Self::$variant };

    // Helper to generate errno bodies
    (@errno_body ($inner:ty) $bind:ident) => { $bind.errno() };
    (@errno_body [$errno:expr] $bind:ident) => { -($errno as i64) };

    // Helper to generate display bodies
    (@display_body $self:ident $f:ident $desc:literal ($inner:ty) $bind:ident) => {
        write!($f, "E{:04X}: {} ({})", $self.code(), $desc, $bind)
    };
    (@display_body $self:ident $f:ident $desc:literal $bind:ident) => {
        write!($f, "E{:04X}: {}", $self.code(), $desc)
    };
}
