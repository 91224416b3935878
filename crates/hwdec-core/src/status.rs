//! Backend status codes.
//!
//! The decoder ABI reports every outcome as a signed integer: zero is
//! success, negative values are errors and positive values are warnings.
//! [`Status`] keeps the raw value so unknown codes survive the round trip.

use std::fmt;

/// Raw status code returned by a decode backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(pub i32);

impl Status {
    pub const NONE: Self = Self(0);
    pub const UNKNOWN: Self = Self(-1);
    pub const NULL_PTR: Self = Self(-2);
    pub const UNSUPPORTED: Self = Self(-3);
    pub const MEMORY_ALLOC: Self = Self(-4);
    pub const NOT_ENOUGH_BUFFER: Self = Self(-5);
    pub const INVALID_HANDLE: Self = Self(-6);
    pub const LOCK_MEMORY: Self = Self(-7);
    pub const NOT_INITIALIZED: Self = Self(-8);
    pub const NOT_FOUND: Self = Self(-9);
    pub const MORE_DATA: Self = Self(-10);
    pub const MORE_SURFACE: Self = Self(-11);
    pub const ABORTED: Self = Self(-12);
    pub const DEVICE_LOST: Self = Self(-13);
    pub const INCOMPATIBLE_VIDEO_PARAM: Self = Self(-14);
    pub const INVALID_VIDEO_PARAM: Self = Self(-15);
    pub const UNDEFINED_BEHAVIOR: Self = Self(-16);
    pub const DEVICE_FAILED: Self = Self(-17);
    pub const MORE_BITSTREAM: Self = Self(-18);
    pub const GPU_HANG: Self = Self(-21);
    pub const REALLOC_SURFACE: Self = Self(-22);

    pub const WRN_IN_EXECUTION: Self = Self(1);
    pub const WRN_DEVICE_BUSY: Self = Self(2);
    pub const WRN_VIDEO_PARAM_CHANGED: Self = Self(3);
    pub const WRN_PARTIAL_ACCELERATION: Self = Self(4);
    pub const WRN_INCOMPATIBLE_VIDEO_PARAM: Self = Self(5);

    #[inline]
    pub fn is_ok(self) -> bool {
        self == Self::NONE
    }

    #[inline]
    pub fn is_error(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn is_warning(self) -> bool {
        self.0 > 0
    }

    /// Symbolic name of the code, or `None` for codes outside the table.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::NONE => "MFX_ERR_NONE",
            Self::UNKNOWN => "MFX_ERR_UNKNOWN",
            Self::NULL_PTR => "MFX_ERR_NULL_PTR",
            Self::UNSUPPORTED => "MFX_ERR_UNSUPPORTED",
            Self::MEMORY_ALLOC => "MFX_ERR_MEMORY_ALLOC",
            Self::NOT_ENOUGH_BUFFER => "MFX_ERR_NOT_ENOUGH_BUFFER",
            Self::INVALID_HANDLE => "MFX_ERR_INVALID_HANDLE",
            Self::LOCK_MEMORY => "MFX_ERR_LOCK_MEMORY",
            Self::NOT_INITIALIZED => "MFX_ERR_NOT_INITIALIZED",
            Self::NOT_FOUND => "MFX_ERR_NOT_FOUND",
            Self::MORE_DATA => "MFX_ERR_MORE_DATA",
            Self::MORE_SURFACE => "MFX_ERR_MORE_SURFACE",
            Self::ABORTED => "MFX_ERR_ABORTED",
            Self::DEVICE_LOST => "MFX_ERR_DEVICE_LOST",
            Self::INCOMPATIBLE_VIDEO_PARAM => "MFX_ERR_INCOMPATIBLE_VIDEO_PARAM",
            Self::INVALID_VIDEO_PARAM => "MFX_ERR_INVALID_VIDEO_PARAM",
            Self::UNDEFINED_BEHAVIOR => "MFX_ERR_UNDEFINED_BEHAVIOR",
            Self::DEVICE_FAILED => "MFX_ERR_DEVICE_FAILED",
            Self::MORE_BITSTREAM => "MFX_ERR_MORE_BITSTREAM",
            Self::GPU_HANG => "MFX_ERR_GPU_HANG",
            Self::REALLOC_SURFACE => "MFX_ERR_REALLOC_SURFACE",
            Self::WRN_IN_EXECUTION => "MFX_WRN_IN_EXECUTION",
            Self::WRN_DEVICE_BUSY => "MFX_WRN_DEVICE_BUSY",
            Self::WRN_VIDEO_PARAM_CHANGED => "MFX_WRN_VIDEO_PARAM_CHANGED",
            Self::WRN_PARTIAL_ACCELERATION => "MFX_WRN_PARTIAL_ACCELERATION",
            Self::WRN_INCOMPATIBLE_VIDEO_PARAM => "MFX_WRN_INCOMPATIBLE_VIDEO_PARAM",
            _ => return None,
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "<unknown status {}>", self.0),
        }
    }
}
