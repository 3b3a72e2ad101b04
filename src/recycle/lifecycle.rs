//! Use-after-recycle detection for pooled objects.

use std::panic::Location;

use thiserror::Error;

/// Source location captured when an object was returned to its pool.
pub type ReleaseSite = &'static Location<'static>;

/// Failures raised by the recycling guard.
///
/// Both variants indicate a programming error in the caller: the object was
/// touched after its owner gave it back.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecycleError {
    /// An accessor ran after the object was recycled.
    #[error("object accessed after recycling{}", site_suffix(.released_at))]
    Recycled {
        /// Where the object was last released, when tracking is enabled.
        released_at: Option<ReleaseSite>,
    },
    /// The object was released while already inactive.
    #[error("object released twice{}", site_suffix(.released_at))]
    DoubleRelease {
        /// Where the earlier release happened, when tracking is enabled.
        released_at: Option<ReleaseSite>,
    },
}

impl RecycleError {
    /// Location of the release that invalidated the object, if recorded.
    #[must_use]
    pub fn released_at(&self) -> Option<ReleaseSite> {
        match self {
            Self::Recycled { released_at } | Self::DoubleRelease { released_at } => *released_at,
        }
    }
}

#[expect(
    clippy::ref_option,
    reason = "thiserror passes field references to format helpers"
)]
fn site_suffix(site: &Option<ReleaseSite>) -> String {
    site.map_or_else(String::new, |loc| format!(" (released at {loc})"))
}

/// Active flag, generation counter and release marker carried by every
/// pooled object.
///
/// A generation is handed out each time the object is activated. Handles
/// that captured an older generation fail [`check`](Self::check) even after
/// the object has been reused for unrelated work.
#[derive(Clone, Copy, Debug, Default)]
pub struct Lifecycle {
    active: bool,
    generation: u64,
    released_at: Option<ReleaseSite>,
    track: bool,
}

impl Lifecycle {
    /// Create an inactive lifecycle.
    #[must_use]
    pub const fn new(track: bool) -> Self {
        Self {
            active: false,
            generation: 0,
            released_at: None,
            track,
        }
    }

    /// Mark the object as in use and return the fresh generation.
    pub fn activate(&mut self, track: bool) -> u64 {
        self.track = track;
        self.active = true;
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// Mark the object as released.
    ///
    /// # Errors
    ///
    /// Returns [`RecycleError::DoubleRelease`] if the object is already
    /// inactive.
    pub fn retire(&mut self, site: ReleaseSite) -> Result<(), RecycleError> {
        if !self.active {
            return Err(RecycleError::DoubleRelease {
                released_at: self.released_at,
            });
        }
        self.active = false;
        if self.track {
            self.released_at = Some(site);
        }
        Ok(())
    }

    /// Confirm a handle issued for `generation` may still touch the object.
    ///
    /// # Errors
    ///
    /// Returns [`RecycleError::Recycled`] when the object is inactive or has
    /// since been activated for a later generation.
    pub fn check(&self, generation: u64) -> Result<(), RecycleError> {
        if self.active && self.generation == generation {
            Ok(())
        } else {
            Err(RecycleError::Recycled {
                released_at: self.released_at,
            })
        }
    }

    /// Whether the object is currently in use.
    #[must_use]
    pub const fn is_active(&self) -> bool { self.active }

    /// Generation handed out by the most recent activation.
    #[must_use]
    pub const fn generation(&self) -> u64 { self.generation }

    /// Where the object was last released, if tracking was enabled.
    #[must_use]
    pub const fn released_at(&self) -> Option<ReleaseSite> { self.released_at }
}
