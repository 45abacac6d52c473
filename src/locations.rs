//! Static placement preference table and the fallback candidate order.
//!
//! Accelerator capacity is a volatile, per-location resource. Rather than
//! failing a run on the first capacity rejection, the orchestrator walks an
//! ordered list of (region, zone) candidates: the operator's preferred
//! region first, then a fixed fallback sequence. The order is deterministic
//! so failures are reproducible.

use crate::provider::Location;

/// Fallback regions tried after the preferred region, in order.
const FALLBACK_REGIONS: [&str; 4] = ["us-central1", "us-east1", "us-west1", "us-west4"];

/// Zones tried within each known region, in order.
const ZONES_BY_REGION: [(&str, &[&str]); 4] = [
    (
        "us-central1",
        &[
            "us-central1-a",
            "us-central1-b",
            "us-central1-c",
            "us-central1-f",
        ],
    ),
    ("us-east1", &["us-east1-b", "us-east1-c", "us-east1-d"]),
    ("us-west1", &["us-west1-a", "us-west1-b", "us-west1-c"]),
    ("us-west4", &["us-west4-a", "us-west4-b", "us-west4-c"]),
];

/// Returns the zones listed for `region`, or `None` for unknown regions.
#[must_use]
pub fn zones_for(region: &str) -> Option<&'static [&'static str]> {
    ZONES_BY_REGION
        .iter()
        .find(|(name, _)| *name == region)
        .map(|(_, zones)| *zones)
}

/// Builds the ordered candidate list for a run.
///
/// The preferred region's zones come first, followed by the fixed fallback
/// sequence with the preferred region deduplicated. Regions without a zone
/// table entry are skipped; a preferred region that is itself unknown
/// contributes no candidates of its own.
#[must_use]
pub fn candidates(preferred_region: &str) -> Vec<Location> {
    let mut ordered: Vec<&str> = Vec::with_capacity(FALLBACK_REGIONS.len() + 1);
    ordered.push(preferred_region);
    for region in FALLBACK_REGIONS {
        if region != preferred_region {
            ordered.push(region);
        }
    }

    let mut locations = Vec::new();
    for region in ordered {
        let Some(zones) = zones_for(region) else {
            continue;
        };
        for zone in zones {
            locations.push(Location::new(region, *zone));
        }
    }
    locations
}
