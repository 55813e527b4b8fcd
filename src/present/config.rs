use tracing::{info, warn};

use crate::backend::drm::planes::PlaneAssignment;
use crate::utils::WRAP_THRESHOLD;

/// Number of overlay planes each display controller pipe provides
pub const PLANES_PER_DISPLAY: usize = 2;

/// Environment variable forcing every swap to be carried out as an immediate blit
pub const ENV_TEAR_FB: &str = "PLANESWAP_TEAR_FB";
/// Environment variable announcing that scanout happens from a shadow framebuffer
pub const ENV_SHADOW_FB: &str = "PLANESWAP_SHADOW_FB";
/// Environment variable holding the plane assignments of the first display
pub const ENV_SPRITE_ASSIGNMENT_D1: &str = "PLANESWAP_SPRITE_ASSIGNMENT_D1";
/// Environment variable holding the plane assignments of the second display
pub const ENV_SPRITE_ASSIGNMENT_D2: &str = "PLANESWAP_SPRITE_ASSIGNMENT_D2";

/// Tunables of the [`PresentScheduler`](super::PresentScheduler)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentConfig {
    /// Carry out swaps as immediate blits, accepting tearing
    pub tear_free_blit: bool,
    /// Outputs scan out of a shadow framebuffer, which rules out full-surface flips
    pub shadow_scanout: bool,
    /// Retraces a completion may lag behind its submission before it is accepted as a
    /// counter wrap-around
    pub wrap_threshold: u32,
    /// Static assignment of the overlay planes, in registry order
    pub plane_assignments: Vec<PlaneAssignment>,
}

impl Default for PresentConfig {
    fn default() -> Self {
        PresentConfig {
            tear_free_blit: false,
            shadow_scanout: false,
            wrap_threshold: WRAP_THRESHOLD,
            plane_assignments: Vec::new(),
        }
    }
}

impl PresentConfig {
    /// Read the configuration from the process environment
    ///
    /// See [`PresentConfig::from_vars`] for the recognized variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build the configuration from a variable lookup
    ///
    /// - [`ENV_TEAR_FB`] and [`ENV_SHADOW_FB`] are flags, accepting `1`, `true`, `yes` or `y`
    /// - [`ENV_SPRITE_ASSIGNMENT_D1`] and [`ENV_SPRITE_ASSIGNMENT_D2`] hold the assignments of
    ///   the two planes of each display, see [`parse_assignments`]
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| {
            lookup(key)
                .map(|x| {
                    x == "1"
                        || x.to_lowercase() == "true"
                        || x.to_lowercase() == "yes"
                        || x.to_lowercase() == "y"
                })
                .unwrap_or(false)
        };

        let mut config = PresentConfig {
            tear_free_blit: flag(ENV_TEAR_FB),
            shadow_scanout: flag(ENV_SHADOW_FB),
            ..Default::default()
        };
        if config.tear_free_blit {
            info!("{} is set. Swaps are carried out as immediate blits.", ENV_TEAR_FB);
        }

        for (display, key) in [ENV_SPRITE_ASSIGNMENT_D1, ENV_SPRITE_ASSIGNMENT_D2]
            .into_iter()
            .enumerate()
        {
            let Some(value) = lookup(key) else {
                continue;
            };
            let offset = display * PLANES_PER_DISPLAY;
            if config.plane_assignments.len() < offset + PLANES_PER_DISPLAY {
                config
                    .plane_assignments
                    .resize(offset + PLANES_PER_DISPLAY, PlaneAssignment::empty());
            }
            for (idx, assignment) in parse_assignments(&value).into_iter().enumerate() {
                config.plane_assignments[offset + idx] = assignment;
            }
        }

        config
    }
}

/// Parse the plane assignments of one display.
///
/// Each character assigns one plane, in order: `V` reserves the plane for video acceleration,
/// `G` for 3D rendering and `X` for the video overlay. Unknown characters leave the plane
/// unrestricted, characters beyond the planes of a display are ignored.
pub fn parse_assignments(value: &str) -> Vec<PlaneAssignment> {
    let mut assignments = Vec::with_capacity(PLANES_PER_DISPLAY);
    for code in value.trim().chars() {
        if assignments.len() == PLANES_PER_DISPLAY {
            warn!("Ignoring surplus plane assignments in `{}`", value);
            break;
        }
        let assignment = PlaneAssignment::from_code(code).unwrap_or_else(|| {
            warn!("Invalid plane assignment `{}`, leaving plane unrestricted", code);
            PlaneAssignment::empty()
        });
        assignments.push(assignment);
    }
    assignments
}
