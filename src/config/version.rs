// xDS version management module
// Manages version numbers and nonces for gateway resources

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// xDS resource type definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Identity,
    Target,
    Permission,
    Route,
    Stage,
}

impl ResourceType {
    pub const ALL: [Self; 5] = [
        Self::Identity,
        Self::Target,
        Self::Permission,
        Self::Route,
        Self::Stage,
    ];

    /// Path segment after `/v1/discovery:`
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Identity => "identities",
            Self::Target => "targets",
            Self::Permission => "permissions",
            Self::Route => "routes",
            Self::Stage => "stages",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "IDENTITY"),
            Self::Target => write!(f, "TARGET"),
            Self::Permission => write!(f, "PERMISSION"),
            Self::Route => write!(f, "ROUTE"),
            Self::Stage => write!(f, "STAGE"),
        }
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Versioned resource state
#[derive(Debug)]
pub struct VersionedResource {
    pub version: AtomicU64,
    pub nonce: AtomicU64,
}

impl VersionedResource {
    pub fn new() -> Self {
        Self {
            version: AtomicU64::new(now_millis()),
            nonce: AtomicU64::new(1),
        }
    }

    /// Bump to the current time, strictly above the previous version
    pub fn increment(&self) -> (u64, u64) {
        let now = now_millis();
        let previous = self
            .version
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(now.max(v + 1))
            })
            .unwrap_or_default();
        let new_version = now.max(previous + 1);
        let new_nonce = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        (new_version, new_nonce)
    }

    pub fn get(&self) -> (u64, u64) {
        (
            self.version.load(Ordering::SeqCst),
            self.nonce.load(Ordering::SeqCst),
        )
    }
}

impl Default for VersionedResource {
    fn default() -> Self {
        Self::new()
    }
}

/// xDS resource version manager
pub struct XdsVersionManager {
    pub identity: VersionedResource,
    pub target: VersionedResource,
    pub permission: VersionedResource,
    pub route: VersionedResource,
    pub stage: VersionedResource,
}

impl XdsVersionManager {
    pub fn new() -> Self {
        Self {
            identity: VersionedResource::new(),
            target: VersionedResource::new(),
            permission: VersionedResource::new(),
            route: VersionedResource::new(),
            stage: VersionedResource::new(),
        }
    }

    pub const fn get_resource(&self, resource_type: ResourceType) -> &VersionedResource {
        match resource_type {
            ResourceType::Identity => &self.identity,
            ResourceType::Target => &self.target,
            ResourceType::Permission => &self.permission,
            ResourceType::Route => &self.route,
            ResourceType::Stage => &self.stage,
        }
    }

    pub fn increment(&self, resource_type: ResourceType) -> (u64, u64) {
        self.get_resource(resource_type).increment()
    }

    pub fn get_version(&self, resource_type: ResourceType) -> (u64, u64) {
        self.get_resource(resource_type).get()
    }

    /// Highest version across all resource types
    pub fn max_version(&self) -> u64 {
        ResourceType::ALL
            .iter()
            .map(|t| self.get_version(*t).0)
            .max()
            .unwrap_or_default()
    }
}

impl Default for XdsVersionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_is_strictly_monotonic() {
        let versions = XdsVersionManager::new();
        let (before, nonce) = versions.get_version(ResourceType::Route);
        let (first, first_nonce) = versions.increment(ResourceType::Route);
        let (second, _) = versions.increment(ResourceType::Route);

        assert!(first > before);
        assert!(second > first);
        assert_eq!(first_nonce, nonce + 1);
        assert_eq!(versions.get_version(ResourceType::Route).0, second);
    }

    #[test]
    fn test_types_are_independent() {
        let versions = XdsVersionManager::new();
        let (target_before, _) = versions.get_version(ResourceType::Target);
        versions.increment(ResourceType::Permission);
        assert_eq!(versions.get_version(ResourceType::Target).0, target_before);
        assert!(versions.max_version() >= target_before);
    }

    #[test]
    fn test_plural_paths() {
        assert_eq!(ResourceType::Identity.plural(), "identities");
        assert_eq!(ResourceType::Permission.to_string(), "PERMISSION");
    }
}
