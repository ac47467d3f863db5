//! SharePoint enumerations carried as numbers on the wire.

use serde::{Deserialize, Serialize};
use sharebridge_core::{BridgeError, BridgeResult, FieldValue};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Enum fields whose wire value is their position in `NAMES`.
pub trait WireEnum: Sized + Copy {
    const NAMES: &'static [&'static str];

    fn from_wire(value: i64) -> Option<Self>;

    fn to_wire(self) -> i64;

    /// Read from a loaded field value.
    fn from_field(value: &FieldValue) -> BridgeResult<Option<Self>> {
        match value.as_i64() {
            None if value.is_null() => Ok(None),
            None => Err(BridgeError::serialization(format!("expected an enum value, got {}", value))),
            Some(n) => Self::from_wire(n)
                .map(Some)
                .ok_or_else(|| BridgeError::serialization(format!("unknown enum value {}", n))),
        }
    }
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant = $value),+
        }

        impl WireEnum for $name {
            const NAMES: &'static [&'static str] = &[$(stringify!($variant)),+];

            fn from_wire(value: i64) -> Option<Self> {
                match value {
                    $(v if v == $value => Some($name::$variant),)+
                    _ => None,
                }
            }

            fn to_wire(self) -> i64 {
                self as i64
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> i64 {
                value.to_wire()
            }
        }

        impl From<$name> for FieldValue {
            fn from(value: $name) -> FieldValue {
                FieldValue::Enum(value.to_wire())
            }
        }
    };
}

wire_enum! {
    /// How a file is checked out.
    CheckOutType {
        Online = 0,
        Offline = 1,
        None = 2,
    }
}

wire_enum! {
    /// Kind of version created by a check-in.
    CheckinType {
        Minor = 0,
        Major = 1,
        Overwrite = 2,
    }
}

impl Default for CheckinType {
    fn default() -> Self {
        CheckinType::Minor
    }
}

wire_enum! {
    CustomizedPageStatus {
        None = 0,
        Uncustomized = 1,
        Customized = 2,
    }
}

wire_enum! {
    ListPageRenderType {
        Unknown = 0,
        MultipleWePart = 1,
        JSLinkCustomization = 2,
        XslLinkCustomization = 3,
        NoSPList = 4,
        HasBusinessDataWebPart = 5,
        NoSchemaViewSpecific = 6,
        HasAttachmentsField = 7,
        HasBlockingFieldTypes = 8,
        HasUnsupportedCustomFields = 9,
        HasCustomActions = 10,
        ListIsNotSupported = 11,
        Modern = 12,
    }
}

/// Flags for `File::move_to`. Combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MoveOperations(u32);

impl MoveOperations {
    pub const NONE: Self = Self(0);
    pub const OVERWRITE: Self = Self(1);
    pub const ALLOW_BROKEN_THICKETS: Self = Self(8);
    pub const BYPASS_APPROVE_PERMISSION: Self = Self(64);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MoveOperations {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MoveOperations {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<MoveOperations> for i64 {
    fn from(value: MoveOperations) -> i64 {
        i64::from(value.0)
    }
}

impl fmt::Display for MoveOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
