//! Stage change notices.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::util::Path;

/// How a resynced prim changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PrimResyncType {
    RenameSource,
    RenameDestination,
    ReparentSource,
    ReparentDestination,
    RenameAndReparentSource,
    RenameAndReparentDestination,
    Delete,
    UnchangedPrimStack,
    Other,
    /// The path was not resynced.
    #[default]
    Invalid,
}

impl PrimResyncType {
    /// Source and destination kinds for a namespace move `from -> to`.
    pub fn for_move(from: &Path, to: &Path) -> (Self, Self) {
        let renamed = from.name() != to.name();
        let reparented = from.parent() != to.parent();
        match (renamed, reparented) {
            (true, false) => (Self::RenameSource, Self::RenameDestination),
            (false, true) => (Self::ReparentSource, Self::ReparentDestination),
            _ => (Self::RenameAndReparentSource, Self::RenameAndReparentDestination),
        }
    }

    /// Check if this is one side of a namespace move.
    #[inline]
    pub fn is_move(&self) -> bool {
        self.is_source() || self.is_destination()
    }

    #[inline]
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            Self::RenameSource | Self::ReparentSource | Self::RenameAndReparentSource
        )
    }

    #[inline]
    pub fn is_destination(&self) -> bool {
        matches!(
            self,
            Self::RenameDestination | Self::ReparentDestination | Self::RenameAndReparentDestination
        )
    }
}

impl fmt::Display for PrimResyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Key for revoking a notice listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoticeKey(u64);

static NEXT_NOTICE_KEY: AtomicU64 = AtomicU64::new(1);

impl NoticeKey {
    pub(crate) fn next() -> Self {
        Self(NEXT_NOTICE_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// Objects of a stage affected by one batch of layer changes.
///
/// Resynced paths need a full re-read of the prim (or property) subtree;
/// info-only paths kept their namespace but some fields changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectsChanged {
    pub(crate) resynced: Vec<Path>,
    pub(crate) info_only: Vec<Path>,
    pub(crate) changed_fields: BTreeMap<Path, Vec<String>>,
    pub(crate) resync_types: BTreeMap<Path, (PrimResyncType, Path)>,
}

impl ObjectsChanged {
    /// Resynced paths, without descendants of other resynced paths.
    pub fn resynced_paths(&self) -> &[Path] {
        &self.resynced
    }

    /// Paths whose fields changed without a resync.
    pub fn changed_info_only_paths(&self) -> &[Path] {
        &self.info_only
    }

    /// Field names changed at `path`.
    pub fn changed_fields(&self, path: &Path) -> Vec<String> {
        self.changed_fields.get(path).cloned().unwrap_or_default()
    }

    /// Check if `path` or an ancestor was resynced.
    pub fn affected_object(&self, path: &Path) -> bool {
        self.resynced.iter().any(|r| path.has_prefix(r)) || self.info_only.contains(path)
    }

    /// Resync kind of a prim and the path it is associated with: the other
    /// side of a move, or the empty path.
    ///
    /// Descendants of a moved prim report the move with the associated path
    /// mapped along. Paths that were not resynced report `Invalid`.
    pub fn prim_resync_type(&self, path: &Path) -> (PrimResyncType, Path) {
        if let Some(entry) = self.resync_types.get(path) {
            return entry.clone();
        }
        for (root, (kind, associated)) in &self.resync_types {
            if !kind.is_move() || !path.has_prefix(root) {
                continue;
            }
            if let Some(mapped) = path.replace_prefix(root, associated) {
                return (*kind, mapped);
            }
        }
        (PrimResyncType::Invalid, Path::empty())
    }

    pub fn is_empty(&self) -> bool {
        self.resynced.is_empty() && self.info_only.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s).expect("valid path")
    }

    #[test]
    fn test_move_kinds() {
        assert_eq!(
            PrimResyncType::for_move(&p("/A/B"), &p("/A/C")),
            (PrimResyncType::RenameSource, PrimResyncType::RenameDestination)
        );
        assert_eq!(
            PrimResyncType::for_move(&p("/A/B"), &p("/C/B")),
            (PrimResyncType::ReparentSource, PrimResyncType::ReparentDestination)
        );
        assert_eq!(
            PrimResyncType::for_move(&p("/A/B"), &p("/C/D")).0,
            PrimResyncType::RenameAndReparentSource
        );
    }

    #[test]
    fn test_descendants_follow_moves() {
        let mut notice = ObjectsChanged::default();
        notice.resynced = vec![p("/A"), p("/B")];
        notice
            .resync_types
            .insert(p("/A"), (PrimResyncType::RenameSource, p("/B")));
        notice
            .resync_types
            .insert(p("/B"), (PrimResyncType::RenameDestination, p("/A")));

        assert_eq!(
            notice.prim_resync_type(&p("/A/Child")),
            (PrimResyncType::RenameSource, p("/B/Child"))
        );
        assert_eq!(notice.prim_resync_type(&p("/C")).0, PrimResyncType::Invalid);
        assert!(notice.affected_object(&p("/B/Child.attr")));
    }
}
