//! Expansion of region/target tokens into an ordered region list.
//!
//! Tokens:
//! - `<target>:`: every region of the target, as listed by the store. The
//!   `master` target excludes the master region itself.
//! - anything else: one literal region.
//!
//! An empty token list means `master:`. When at least one target token was
//! given, regions named in the preferred order come first (in that order),
//! followed by the rest in resolution order. A fully literal list is kept
//! exactly as given.

use glancesync_core::types::{RegionName, TargetName, TARGET_SEPARATOR};
use glancesync_sync::{ImageStore, StoreError};

/// One parsed command-line token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionToken {
    Target(TargetName),
    Region(RegionName),
}

impl RegionToken {
    pub fn parse(token: &str) -> Self {
        match token.strip_suffix(TARGET_SEPARATOR) {
            Some(target) => RegionToken::Target(TargetName::from(target)),
            None => RegionToken::Region(RegionName::from(token)),
        }
    }
}

/// Resolve `tokens` against the store.
pub fn plan_regions<S: AsRef<str>>(
    tokens: &[S],
    store: &dyn ImageStore,
    master_region: &RegionName,
    preferred: &[RegionName],
) -> Result<Vec<RegionName>, StoreError> {
    let mut parsed: Vec<RegionToken> = tokens.iter().map(|t| RegionToken::parse(t.as_ref())).collect();
    if parsed.is_empty() {
        parsed.push(RegionToken::Target(TargetName::master()));
    }

    let mut expanded = false;
    let mut regions: Vec<RegionName> = Vec::new();
    for token in parsed {
        match token {
            RegionToken::Target(target) => {
                expanded = true;
                for region in store.list_target_regions(&target)? {
                    if target.is_master() && &region == master_region {
                        continue;
                    }
                    push_unique(&mut regions, region);
                }
            }
            RegionToken::Region(region) => push_unique(&mut regions, region),
        }
    }

    if !expanded {
        return Ok(regions);
    }
    Ok(apply_preferred_order(regions, preferred))
}

/// Preferred regions first, in preferred order; the rest keep their order.
pub fn apply_preferred_order(regions: Vec<RegionName>, preferred: &[RegionName]) -> Vec<RegionName> {
    let mut ordered: Vec<RegionName> = Vec::with_capacity(regions.len());
    for region in preferred.iter().filter(|region| regions.contains(region)) {
        push_unique(&mut ordered, region.clone());
    }
    for region in regions {
        push_unique(&mut ordered, region);
    }
    ordered
}

fn push_unique(regions: &mut Vec<RegionName>, region: RegionName) {
    if !regions.contains(&region) {
        regions.push(region);
    }
}
