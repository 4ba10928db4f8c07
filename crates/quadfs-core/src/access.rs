//! # Access Model
//!
//! Ordered access levels and the implication rules between them.
//!
//! `None < List < Read < Write < Manage` is a total order. A level implies
//! every level below it, so checks are plain comparisons.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// ACCESS LEVEL
// =============================================================================

/// Authorization grade a subject holds on a resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    None,
    List,
    Read,
    Write,
    Manage,
}

impl AccessLevel {
    /// All levels in ascending order.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::List,
        Self::Read,
        Self::Write,
        Self::Manage,
    ];

    /// True iff `self >= required`.
    #[must_use]
    pub fn implies(self, required: Self) -> bool {
        self >= required
    }

    pub fn can_list(self) -> bool {
        self.implies(Self::List)
    }

    pub fn can_read(self) -> bool {
        self.implies(Self::Read)
    }

    pub fn can_write(self) -> bool {
        self.implies(Self::Write)
    }

    pub fn can_manage(self) -> bool {
        self.implies(Self::Manage)
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::List => "list",
            Self::Read => "read",
            Self::Write => "write",
            Self::Manage => "manage",
        }
    }

    /// Compact encoding used by the permission tables.
    pub(crate) fn to_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of `to_u8`; unknown codes decode to `None`.
    pub(crate) fn from_u8(code: u8) -> Self {
        Self::ALL
            .get(usize::from(code))
            .copied()
            .unwrap_or(Self::None)
    }
}

/// Free-function form of [`AccessLevel::implies`].
pub fn implies(a: AccessLevel, required: AccessLevel) -> bool {
    a.implies(required)
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive; anything unrecognised is `None`, which implies nothing.
impl FromStr for AccessLevel {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "list" => Self::List,
            "read" => Self::Read,
            "write" => Self::Write,
            "manage" => Self::Manage,
            _ => Self::None,
        };
        Ok(level)
    }
}

// =============================================================================
// ACCESS VIEW
// =============================================================================

/// Derived capabilities of a principal on one resource.
///
/// A workspace is a top-level directory; listing is implied by membership
/// so the workspace variant carries no `can_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessView {
    Resource {
        resource: String,
        access: AccessLevel,
        can_list: bool,
        can_read: bool,
        can_write: bool,
        can_manage: bool,
    },
    Workspace {
        workspace: String,
        access: AccessLevel,
        can_read: bool,
        can_write: bool,
        can_manage: bool,
    },
}

impl AccessView {
    #[must_use]
    pub fn resource(resource: impl Into<String>, access: AccessLevel) -> Self {
        Self::Resource {
            resource: resource.into(),
            access,
            can_list: access.can_list(),
            can_read: access.can_read(),
            can_write: access.can_write(),
            can_manage: access.can_manage(),
        }
    }

    #[must_use]
    pub fn workspace(workspace: impl Into<String>, access: AccessLevel) -> Self {
        Self::Workspace {
            workspace: workspace.into(),
            access,
            can_read: access.can_read(),
            can_write: access.can_write(),
            can_manage: access.can_manage(),
        }
    }

    /// The level the view was derived from.
    pub fn access(&self) -> AccessLevel {
        match self {
            Self::Resource { access, .. } | Self::Workspace { access, .. } => *access,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_totally_ordered() {
        for pair in AccessLevel::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn higher_levels_imply_lower_levels() {
        for (i, a) in AccessLevel::ALL.iter().enumerate() {
            for (j, required) in AccessLevel::ALL.iter().enumerate() {
                assert_eq!(implies(*a, *required), i >= j, "{} vs {}", a, required);
            }
        }
    }

    #[test]
    fn none_implies_nothing_but_none() {
        let none = AccessLevel::None;
        assert!(!none.can_list());
        assert!(!none.can_read());
        assert!(!none.can_write());
        assert!(!none.can_manage());
        assert!(none.implies(AccessLevel::None));
    }

    #[test]
    fn write_implies_read_and_list() {
        let write = AccessLevel::Write;
        assert!(write.can_list());
        assert!(write.can_read());
        assert!(write.can_write());
        assert!(!write.can_manage());
    }

    #[test]
    fn unknown_level_parses_to_none() {
        assert_eq!("bogus".parse::<AccessLevel>(), Ok(AccessLevel::None));
        assert_eq!("".parse::<AccessLevel>(), Ok(AccessLevel::None));
        assert_eq!(" Write ".parse::<AccessLevel>(), Ok(AccessLevel::Write));
        assert_eq!("MANAGE".parse::<AccessLevel>(), Ok(AccessLevel::Manage));
    }

    #[test]
    fn u8_codes_round_trip_and_unknown_is_none() {
        for level in AccessLevel::ALL {
            assert_eq!(AccessLevel::from_u8(level.to_u8()), level);
        }
        assert_eq!(AccessLevel::from_u8(200), AccessLevel::None);
    }

    #[test]
    fn access_views_carry_derived_capabilities() {
        let view = AccessView::resource("urn:r", AccessLevel::Read);
        assert_eq!(
            view,
            AccessView::Resource {
                resource: "urn:r".to_string(),
                access: AccessLevel::Read,
                can_list: true,
                can_read: true,
                can_write: false,
                can_manage: false,
            }
        );

        let view = AccessView::workspace("urn:w", AccessLevel::Manage);
        assert_eq!(view.access(), AccessLevel::Manage);
        assert!(matches!(
            view,
            AccessView::Workspace {
                can_manage: true,
                ..
            }
        ));
    }
}
