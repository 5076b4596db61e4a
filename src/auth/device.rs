//! Device classification and fingerprinting.
//!
//! The fingerprint binds tokens to the device that obtained them. Installed
//! apps (PWA shells, WebViews) report less stable header sets than browser
//! tabs, so the compatibility rule is looser for them; the exact thresholds
//! are empirically tuned and kept behind [`fingerprints_compatible`] so they
//! can be swapped without touching the broker.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Hex characters kept from the digest; long enough to avoid collisions,
/// short enough for cookie-embedded claims.
const FINGERPRINT_LEN: usize = 32;
/// Installed-app matching only considers this leading slice, which is
/// dominated by the stable part of the input.
const STABLE_PREFIX_LEN: usize = 20;
/// Jaccard similarity over the stable prefix character sets.
const SIMILARITY_THRESHOLD: f64 = 0.75;

/// Per-request device description. Computed from headers, never stored
/// beyond the token it is embedded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub fingerprint: String,
    pub user_agent: String,
    pub display_mode: String,
    pub viewport_width: Option<u32>,
    pub installed: bool,
}

impl DeviceInfo {
    /// Classify the client and compute its fingerprint from request headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_agent = header_str(headers, "user-agent").unwrap_or_default();
        let display_mode =
            header_str(headers, "x-display-mode").unwrap_or_else(|| "browser".to_string());
        let viewport_width =
            header_str(headers, "x-viewport-width").and_then(|v| v.parse::<u32>().ok());

        let installed = is_installed_app(&user_agent, &display_mode);
        let fingerprint = fingerprint(&user_agent, &display_mode, viewport_width, installed);

        Self {
            fingerprint,
            user_agent,
            display_mode,
            viewport_width,
            installed,
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Installed-app heuristics: standalone display modes, Android WebViews,
/// and iOS shells (Mobile/ UA without the Safari product token).
fn is_installed_app(user_agent: &str, display_mode: &str) -> bool {
    if matches!(display_mode, "standalone" | "fullscreen" | "minimal-ui") {
        return true;
    }
    if user_agent.contains("; wv") {
        return true;
    }
    user_agent.contains("Mobile/") && !user_agent.contains("Safari")
}

/// Truncated hash of `UA | displayMode | viewportWidth | installedFlag`.
///
/// The leading [`STABLE_PREFIX_LEN`] characters hash only the stable
/// attributes; the tail folds in the viewport width. A resized window
/// changes the tail but leaves the prefix intact, which is what the
/// installed-app compatibility rule keys on.
#[must_use]
pub fn fingerprint(
    user_agent: &str,
    display_mode: &str,
    viewport_width: Option<u32>,
    installed: bool,
) -> String {
    let viewport = viewport_width.map_or_else(|| "unknown".to_string(), |w| w.to_string());
    let stable = hex_digest(&format!("{user_agent}|{display_mode}|{installed}"));
    let volatile = hex_digest(&format!("{user_agent}|{display_mode}|{viewport}|{installed}"));

    let mut out: String = stable.chars().take(STABLE_PREFIX_LEN).collect();
    out.extend(volatile.chars().take(FINGERPRINT_LEN - STABLE_PREFIX_LEN));
    out
}

fn hex_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decide whether a stored fingerprint still matches the current device.
///
/// Browser clients require exact equality. Installed-app clients accept
/// bounded drift: character-set Jaccard similarity over the first
/// [`STABLE_PREFIX_LEN`] characters must exceed [`SIMILARITY_THRESHOLD`].
#[must_use]
pub fn fingerprints_compatible(stored: &str, current: &str, installed: bool) -> bool {
    if stored == current {
        return true;
    }
    if !installed {
        return false;
    }
    jaccard_prefix(stored, current) > SIMILARITY_THRESHOLD
}

fn jaccard_prefix(a: &str, b: &str) -> f64 {
    let set_a: HashSet<char> = a.chars().take(STABLE_PREFIX_LEN).collect();
    let set_b: HashSet<char> = b.chars().take(STABLE_PREFIX_LEN).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    #[allow(clippy::cast_precision_loss)]
    {
        intersection as f64 / union as f64
    }
}
