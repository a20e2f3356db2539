//! Resolution of a policy's `(apiGroup, apiVersion, kind)` into a concrete
//! API resource with its plural name.
//!
//! The preferred path asks the server's discovery endpoint; kinds the server
//! does not advertise (or clusters we cannot discover against) fall back to
//! rule-based pluralization. Resolutions are cached for the lifetime of the
//! process.

use std::collections::HashMap;
use std::sync::RwLock;

use kube::api::{ApiResource, GroupVersionKind};
use kube::discovery::Discovery;
use kube::Client;
use tracing::{debug, warn};

use crate::crd::TargetResource;
use crate::error::{Error, Result};

/* ============================= RESOLVER ============================= */

#[derive(Default)]
pub struct GvrResolver {
    cache: RwLock<HashMap<GroupVersionKind, ApiResource>>,
}

impl GvrResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a target's kind to an [`ApiResource`], consulting the cache,
    /// then discovery, then the pluralization fallback.
    pub async fn resolve(&self, client: &Client, target: &TargetResource) -> Result<ApiResource> {
        let gvk = target_gvk(target)?;

        if let Some(resource) = self.cache.read().expect("gvr cache lock").get(&gvk) {
            return Ok(resource.clone());
        }

        let resource = match Discovery::new(client.clone()).run().await {
            Ok(discovery) => match discovery.resolve_gvk(&gvk) {
                Some((resource, _capabilities)) => resource,
                None => {
                    debug!(
                        kind = %gvk.kind,
                        api_version = %target.api_version,
                        "kind_not_in_discovery_using_pluralizer"
                    );
                    fallback_resource(&gvk)
                }
            },
            Err(err) => {
                warn!(error = %err, kind = %gvk.kind, "discovery_failed_using_pluralizer");
                fallback_resource(&gvk)
            }
        };

        self.cache
            .write()
            .expect("gvr cache lock")
            .insert(gvk, resource.clone());
        Ok(resource)
    }

    /// Cached resolution only; used where a network round-trip is not
    /// acceptable.
    pub fn resolve_cached(&self, target: &TargetResource) -> Result<Option<ApiResource>> {
        let gvk = target_gvk(target)?;
        Ok(self.cache.read().expect("gvr cache lock").get(&gvk).cloned())
    }

    #[cfg(test)]
    fn insert(&self, gvk: GroupVersionKind, resource: ApiResource) {
        self.cache.write().unwrap().insert(gvk, resource);
    }
}

/// Validate the target's coordinates. Group may be empty (core), version and
/// kind may not.
pub fn target_gvk(target: &TargetResource) -> Result<GroupVersionKind> {
    if target.api_version.is_empty() || target.kind.is_empty() {
        return Err(Error::InvalidGvr(format!(
            "apiVersion={:?} kind={:?}",
            target.api_version, target.kind
        )));
    }
    Ok(GroupVersionKind::gvk(
        target.api_group.as_deref().unwrap_or(""),
        &target.api_version,
        &target.kind,
    ))
}

fn fallback_resource(gvk: &GroupVersionKind) -> ApiResource {
    ApiResource::from_gvk_with_plural(gvk, &to_plural(&gvk.kind.to_ascii_lowercase()))
}

/// Rule-based pluralization for kinds unknown to discovery. Mirrors the
/// conventions native kinds follow.
fn to_plural(word: &str) -> String {
    if word == "endpoints" {
        return word.to_string();
    }

    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        return format!("{word}es");
    }

    if word.ends_with('y') {
        if let Some(before) = word.chars().rev().nth(1) {
            if !matches!(before, 'a' | 'e' | 'i' | 'o' | 'u') {
                return format!("{}ies", &word[..word.len() - 1]);
            }
        }
    }

    format!("{word}s")
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_plural_common_kinds() {
        for (kind, plural) in [
            ("configmap", "configmaps"),
            ("deployment", "deployments"),
            ("ingress", "ingresses"),
            ("networkpolicy", "networkpolicies"),
            ("gateway", "gateways"),
            ("endpoints", "endpoints"),
            ("box", "boxes"),
            ("branch", "branches"),
        ] {
            assert_eq!(to_plural(kind), plural, "kind {kind}");
        }
    }

    #[test]
    fn test_target_gvk_requires_version_and_kind() {
        let target = TargetResource {
            api_version: "v1".to_string(),
            kind: String::new(),
            ..Default::default()
        };
        assert!(matches!(target_gvk(&target), Err(Error::InvalidGvr(_))));

        let target = TargetResource {
            api_version: String::new(),
            kind: "ConfigMap".to_string(),
            ..Default::default()
        };
        assert!(matches!(target_gvk(&target), Err(Error::InvalidGvr(_))));
    }

    #[test]
    fn test_target_gvk_core_group_is_empty() {
        let target = TargetResource {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            ..Default::default()
        };
        let gvk = target_gvk(&target).unwrap();
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "ConfigMap");
    }

    #[test]
    fn test_fallback_resource_plural() {
        let gvk = GroupVersionKind::gvk("example.dev", "v1", "WidgetPolicy");
        let resource = fallback_resource(&gvk);
        assert_eq!(resource.plural, "widgetpolicies");
        assert_eq!(resource.group, "example.dev");
        assert_eq!(resource.version, "v1");
        assert_eq!(resource.api_version, "example.dev/v1");
    }

    #[test]
    fn test_cache_hit_avoids_discovery() {
        let resolver = GvrResolver::new();
        let target = TargetResource {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            ..Default::default()
        };
        let gvk = target_gvk(&target).unwrap();
        resolver.insert(gvk, fallback_resource(&target_gvk(&target).unwrap()));

        let cached = resolver.resolve_cached(&target).unwrap();
        assert_eq!(cached.map(|r| r.plural), Some("configmaps".to_string()));
    }

    #[test]
    fn test_cache_miss_is_none() {
        let resolver = GvrResolver::new();
        let target = TargetResource {
            api_version: "v1".to_string(),
            kind: "Secret".to_string(),
            ..Default::default()
        };
        assert!(resolver.resolve_cached(&target).unwrap().is_none());
    }
}
