//! Variable layout of the capture-point QP.
//!
//! ```text
//! [ feedback (2) | angular momentum (2, optional) | footstep 0 (2) | footstep 1 (2) | ... ]
//! ```
//!
//! The layout is a plain value recomputed at the top of every tick and passed
//! to each task builder; nothing caches indices between ticks.

use crate::error::LayoutError;

/// Optional blocks of the decision vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    pub use_angular_momentum: bool,
    pub use_step_adjustment: bool,
}

/// A contiguous slice of the decision vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Block {
    Feedback,
    AngularMomentum,
    Footstep(usize),
    /// The whole decision vector.
    Full,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QpVariableLayout {
    flags: FeatureFlags,
    footsteps: usize,
}

/// Assign variable slots for one tick.
///
/// Footstep blocks have zero width when step adjustment is disabled.
pub const fn compute_layout(flags: FeatureFlags, footstep_count: usize) -> QpVariableLayout {
    QpVariableLayout {
        flags,
        footsteps: if flags.use_step_adjustment {
            footstep_count
        } else {
            0
        },
    }
}

impl QpVariableLayout {
    pub const fn flags(&self) -> FeatureFlags {
        self.flags
    }

    pub const fn feedback_index(&self) -> usize {
        0
    }

    pub const fn angular_momentum_index(&self) -> Option<usize> {
        if self.flags.use_angular_momentum {
            Some(2)
        } else {
            None
        }
    }

    pub const fn footstep_start_index(&self) -> usize {
        if self.flags.use_angular_momentum { 4 } else { 2 }
    }

    /// Number of footsteps that own variables.
    pub const fn footstep_count(&self) -> usize {
        self.footsteps
    }

    pub const fn footstep_variable_count(&self) -> usize {
        2 * self.footsteps
    }

    pub const fn footstep_index(&self, step: usize) -> Option<usize> {
        if step < self.footsteps {
            Some(self.footstep_start_index() + 2 * step)
        } else {
            None
        }
    }

    /// Total number of decision variables.
    pub const fn size(&self) -> usize {
        self.footstep_start_index() + self.footstep_variable_count()
    }

    /// Offset and width of `block`, or `None` if it is not part of this layout.
    pub const fn span(&self, block: Block) -> Option<(usize, usize)> {
        match block {
            Block::Feedback => Some((0, 2)),
            Block::AngularMomentum => match self.angular_momentum_index() {
                Some(i) => Some((i, 2)),
                None => None,
            },
            Block::Footstep(step) => match self.footstep_index(step) {
                Some(i) => Some((i, 2)),
                None => None,
            },
            Block::Full => Some((0, self.size())),
        }
    }

    /// Offset of `block`, checking that a task of `size` fits it exactly.
    pub fn checked_offset(&self, block: Block, size: usize) -> Result<usize, LayoutError> {
        match self.span(block) {
            Some((offset, width)) if width == size => Ok(offset),
            Some((_, width)) => Err(LayoutError::LayoutMismatch {
                expected: width,
                got: size,
            }),
            None => Err(LayoutError::LayoutMismatch {
                expected: 0,
                got: size,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: FeatureFlags = FeatureFlags {
        use_angular_momentum: true,
        use_step_adjustment: true,
    };

    #[test]
    fn feedback_only() {
        let layout = compute_layout(FeatureFlags::default(), 3);
        assert_eq!(layout.size(), 2);
        assert_eq!(layout.feedback_index(), 0);
        assert_eq!(layout.angular_momentum_index(), None);
        assert_eq!(layout.footstep_count(), 0);
        assert_eq!(layout.footstep_index(0), None);
    }

    #[test]
    fn all_blocks_in_order() {
        let layout = compute_layout(ALL, 3);
        assert_eq!(layout.angular_momentum_index(), Some(2));
        assert_eq!(layout.footstep_start_index(), 4);
        assert_eq!(layout.footstep_index(2), Some(8));
        assert_eq!(layout.size(), 3 * 2 + 2 + 2);
    }

    #[test]
    fn footsteps_without_angular_momentum() {
        let flags = FeatureFlags {
            use_angular_momentum: false,
            use_step_adjustment: true,
        };
        let layout = compute_layout(flags, 2);
        assert_eq!(layout.footstep_start_index(), 2);
        assert_eq!(layout.size(), 6);
    }

    #[test]
    fn checked_offset_rejects_wrong_size() {
        let layout = compute_layout(ALL, 1);
        assert_eq!(layout.checked_offset(Block::Footstep(0), 2), Ok(4));
        assert_eq!(
            layout.checked_offset(Block::Full, 4),
            Err(LayoutError::LayoutMismatch {
                expected: 6,
                got: 4
            })
        );
    }

    #[test]
    fn disabled_block_rejected() {
        let layout = compute_layout(FeatureFlags::default(), 0);
        assert!(layout.checked_offset(Block::AngularMomentum, 2).is_err());
        assert!(layout.checked_offset(Block::Footstep(0), 2).is_err());
    }
}
