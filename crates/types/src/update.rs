//! Indexed-property updates.
//!
//! An update carries the before-image and after-image of one indexed
//! property across one grain commit. The CRUD operation is derived
//! purely from which images are present; visibility controls whether the
//! bucket applies the mutation for real or only marks it pending for
//! uniqueness serialization.

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{IndexError, InvalidUpdateSnafu, Result};
use crate::value::IndexValue;

/// CRUD operation of one property update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOp {
    /// No change (before == after, or both absent).
    None,
    /// New value appears.
    Insert,
    /// Value changes.
    Update,
    /// Value disappears.
    Delete,
}

/// Visibility of one property update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// Pending: visible only to uniqueness checks, confirmed or
    /// reversed later by the queue processor.
    Tentative,
    /// Committed: the normal queue-applied mutation.
    NonTentative,
    /// Applied inside a transaction; buckets treat it as final.
    Transactional,
}

/// One indexed-property update: before/after images plus derived op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexUpdate {
    /// Property value prior to the commit, if any.
    pub before: Option<IndexValue>,
    /// Property value after the commit, if any.
    pub after: Option<IndexValue>,
    /// Derived CRUD operation.
    pub op: IndexOp,
    /// Visibility of this update.
    pub visibility: Visibility,
}

impl IndexUpdate {
    /// Builds an update from before/after images, deriving the op.
    pub fn from_images(
        before: Option<IndexValue>,
        after: Option<IndexValue>,
        visibility: Visibility,
    ) -> Self {
        let op = match (&before, &after) {
            (None, Some(_)) => IndexOp::Insert,
            (Some(_), None) => IndexOp::Delete,
            (Some(b), Some(a)) if b != a => IndexOp::Update,
            _ => IndexOp::None,
        };
        Self { before, after, op, visibility }
    }

    /// Validates the nullity preconditions of the carried op.
    ///
    /// Updates built through [`from_images`](Self::from_images) always
    /// pass; deserialized updates are checked before buckets apply them.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidUpdate`] when the images do not
    /// match the op.
    pub fn validate(&self) -> Result<()> {
        let ok = match self.op {
            IndexOp::Insert => self.before.is_none() && self.after.is_some(),
            IndexOp::Delete => self.before.is_some() && self.after.is_none(),
            IndexOp::Update => {
                matches!((&self.before, &self.after), (Some(b), Some(a)) if b != a)
            },
            IndexOp::None => true,
        };
        ensure!(
            ok,
            InvalidUpdateSnafu {
                message: format!(
                    "op {:?} with before={:?} after={:?}",
                    self.op, self.before, self.after
                ),
            }
        );
        Ok(())
    }

    /// Returns a copy with a different visibility.
    pub fn with_visibility(&self, visibility: Visibility) -> Self {
        Self { visibility, ..self.clone() }
    }

    /// Returns the reverse CRUD of this update.
    ///
    /// Used by the queue processor to undo tentative writes left behind
    /// by aborted commits: `Insert ↔ Delete`, `Update` swaps its images.
    /// The reversal is applied non-tentatively.
    pub fn reversed(&self) -> Self {
        Self::from_images(self.after.clone(), self.before.clone(), Visibility::NonTentative)
    }

    /// True when the update mutates the index at all.
    #[inline]
    pub fn is_effective(&self) -> bool {
        self.op != IndexOp::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> Option<IndexValue> {
        Some(IndexValue::from(s))
    }

    #[test]
    fn test_op_derivation() {
        assert_eq!(IndexUpdate::from_images(None, val("a"), Visibility::NonTentative).op, IndexOp::Insert);
        assert_eq!(IndexUpdate::from_images(val("a"), None, Visibility::NonTentative).op, IndexOp::Delete);
        assert_eq!(IndexUpdate::from_images(val("a"), val("b"), Visibility::NonTentative).op, IndexOp::Update);
        assert_eq!(IndexUpdate::from_images(val("a"), val("a"), Visibility::NonTentative).op, IndexOp::None);
        assert_eq!(IndexUpdate::from_images(None, None, Visibility::NonTentative).op, IndexOp::None);
    }

    #[test]
    fn test_reversed_swaps_crud() {
        let insert = IndexUpdate::from_images(None, val("a"), Visibility::Tentative);
        let reversed = insert.reversed();
        assert_eq!(reversed.op, IndexOp::Delete);
        assert_eq!(reversed.before, val("a"));
        assert_eq!(reversed.visibility, Visibility::NonTentative);

        let update = IndexUpdate::from_images(val("a"), val("b"), Visibility::NonTentative);
        let reversed = update.reversed();
        assert_eq!(reversed.op, IndexOp::Update);
        assert_eq!(reversed.before, val("b"));
        assert_eq!(reversed.after, val("a"));
    }

    #[test]
    fn test_validate_rejects_mismatched_images() {
        let mut update = IndexUpdate::from_images(None, val("a"), Visibility::NonTentative);
        update.op = IndexOp::Delete;
        assert!(matches!(update.validate(), Err(IndexError::InvalidUpdate { .. })));
    }

    #[test]
    fn test_none_update_is_not_effective() {
        let update = IndexUpdate::from_images(val("a"), val("a"), Visibility::NonTentative);
        assert!(!update.is_effective());
    }
}
