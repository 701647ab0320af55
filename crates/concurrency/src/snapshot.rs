//! Versioned snapshots of a variable's value
//!
//! A [`Snapshot`] is the immutable unit stored in a variable's slot. Every
//! write installs a fresh snapshot produced by [`Snapshot::successor`], and the
//! decision "must watchers be told about this write" is made by comparing the
//! old and new snapshot with [`Snapshot::is_changed`].
//!
//! # Equality policies
//!
//! The policy is chosen once, when the variable is created, and every
//! successor inherits it:
//!
//! - **Versioned** (default): carries a version counter that increases by one
//!   per successor. Two snapshots are changed iff their versions differ, so
//!   every write is observable even if it stores an equal value.
//! - **Custom**: carries a user predicate `changed(old, new)`. A write whose
//!   predicate answers `false` still replaces the slot, but wakes nobody.
//!
//! ```
//! use tvar_concurrency::snapshot::Snapshot;
//!
//! let s1 = Snapshot::versioned(5);
//! let s2 = s1.successor(5);
//! assert!(s1.is_changed(&s2));
//! assert_eq!(s2.version(), Some(2));
//!
//! let c1 = Snapshot::custom("a", |a: &&str, b: &&str| a != b);
//! assert!(!c1.is_changed(&c1.successor("a")));
//! ```

use std::fmt;
use std::sync::Arc;

/// Version carried by the first snapshot of a default-equality variable
pub const INITIAL_VERSION: u64 = 1;

/// Predicate deciding whether `new` is observably different from `old`
pub type ChangedFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Immutable value wrapper stored in a variable's slot
pub enum Snapshot<T> {
    /// Default equality: every successor is a change
    Versioned {
        /// The raw value
        value: T,
        /// Monotonic per-variable version
        version: u64,
    },
    /// Custom equality: the predicate decides what is a change
    Custom {
        /// The raw value
        value: T,
        /// Shared change predicate, inherited by every successor
        changed: ChangedFn<T>,
    },
}

impl<T> Snapshot<T> {
    /// First snapshot of a default-equality variable
    pub fn versioned(value: T) -> Self {
        Snapshot::Versioned {
            value,
            version: INITIAL_VERSION,
        }
    }

    /// First snapshot of a custom-equality variable
    pub fn custom<F>(value: T, changed: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Snapshot::Custom {
            value,
            changed: Arc::new(changed),
        }
    }

    /// Produce the snapshot that replaces this one when `value` is written
    ///
    /// Keeps the variant. Versioned snapshots bump the version, custom
    /// snapshots share the same predicate.
    pub fn successor(&self, value: T) -> Self {
        match self {
            Snapshot::Versioned { version, .. } => Snapshot::Versioned {
                value,
                version: version + 1,
            },
            Snapshot::Custom { changed, .. } => Snapshot::Custom {
                value,
                changed: Arc::clone(changed),
            },
        }
    }

    /// Whether a reader that observed `self` is stale once `other` is installed
    ///
    /// Only ever called as `old.is_changed(new)`.
    pub fn is_changed(&self, other: &Self) -> bool {
        match (self, other) {
            (Snapshot::Versioned { version: a, .. }, Snapshot::Versioned { version: b, .. }) => {
                a != b
            }
            (Snapshot::Custom { value: a, changed }, Snapshot::Custom { value: b, .. }) => {
                changed(a, b)
            }
            // A variable never mixes variants; a mixed pair is always stale.
            _ => true,
        }
    }

    /// The raw value
    pub fn value(&self) -> &T {
        match self {
            Snapshot::Versioned { value, .. } | Snapshot::Custom { value, .. } => value,
        }
    }

    /// Version of a default-equality snapshot, `None` for custom equality
    pub fn version(&self) -> Option<u64> {
        match self {
            Snapshot::Versioned { version, .. } => Some(*version),
            Snapshot::Custom { .. } => None,
        }
    }

    /// Whether this snapshot uses a custom change predicate
    pub fn is_custom(&self) -> bool {
        matches!(self, Snapshot::Custom { .. })
    }
}

impl<T: Clone> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        match self {
            Snapshot::Versioned { value, version } => Snapshot::Versioned {
                value: value.clone(),
                version: *version,
            },
            Snapshot::Custom { value, changed } => Snapshot::Custom {
                value: value.clone(),
                changed: Arc::clone(changed),
            },
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Snapshot::Versioned { value, version } => f
                .debug_struct("Versioned")
                .field("value", value)
                .field("version", version)
                .finish(),
            Snapshot::Custom { value, .. } => f
                .debug_struct("Custom")
                .field("value", value)
                .finish_non_exhaustive(),
        }
    }
}
