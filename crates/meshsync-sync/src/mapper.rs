//! Resource mappers rewrite a resource on its way to a peer.
//!
//! Mappers run after filtering and are chained with [`CompositeMapper`]: the
//! first failing mapper stops the chain.

use serde_json::{json, Value};

use meshsync_protocol::Features;
use meshsync_protocol::features::HASH_SUFFIX;
use meshsync_types::labels::DISPLAY_NAME_LABEL;
use meshsync_types::Resource;

use crate::context::{ZONE_TOKEN_SIGNING_KEY_PREFIX, ZONE_TOKEN_SIGNING_PUBLIC_KEY_PREFIX};
use crate::error::{SyncError, SyncResult};

/// Longest resource name a store accepts.
pub const MAX_NAME_LEN: usize = 253;

/// Hex characters of the digest appended to hashed names.
const HASH_LEN: usize = 16;

/// Rewrites one resource for a peer advertising `features`.
pub trait ResourceMapper: Send + Sync {
    fn map(&self, features: &Features, resource: Resource) -> SyncResult<Resource>;
}

// ---------------------------------------------------------------------------
// CompositeMapper
// ---------------------------------------------------------------------------

/// Applies its mappers in order.
#[derive(Default)]
pub struct CompositeMapper {
    mappers: Vec<Box<dyn ResourceMapper>>,
}

impl CompositeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mapper to the end of the chain.
    pub fn then(mut self, mapper: impl ResourceMapper + 'static) -> Self {
        self.mappers.push(Box::new(mapper));
        self
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

impl ResourceMapper for CompositeMapper {
    fn map(&self, features: &Features, resource: Resource) -> SyncResult<Resource> {
        self.mappers
            .iter()
            .try_fold(resource, |r, mapper| mapper.map(features, r))
    }
}

/// Applies `mapper` only to resources matching `predicate`.
pub struct MapIf {
    predicate: Box<dyn Fn(&Resource) -> bool + Send + Sync>,
    mapper: Box<dyn ResourceMapper>,
}

impl MapIf {
    pub fn new(
        predicate: impl Fn(&Resource) -> bool + Send + Sync + 'static,
        mapper: impl ResourceMapper + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            mapper: Box::new(mapper),
        }
    }
}

impl ResourceMapper for MapIf {
    fn map(&self, features: &Features, resource: Resource) -> SyncResult<Resource> {
        if (self.predicate)(&resource) {
            self.mapper.map(features, resource)
        } else {
            Ok(resource)
        }
    }
}

// ---------------------------------------------------------------------------
// Label and status mappers
// ---------------------------------------------------------------------------

/// Sets one label.
pub struct WithLabel {
    key: String,
    value: String,
}

impl WithLabel {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl ResourceMapper for WithLabel {
    fn map(&self, _features: &Features, mut resource: Resource) -> SyncResult<Resource> {
        resource
            .meta
            .labels
            .insert(self.key.clone(), self.value.clone());
        Ok(resource)
    }
}

/// Drops one label.
pub struct WithoutLabel {
    key: String,
}

impl WithoutLabel {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl ResourceMapper for WithoutLabel {
    fn map(&self, _features: &Features, mut resource: Resource) -> SyncResult<Resource> {
        resource.meta.labels.remove(&self.key);
        Ok(resource)
    }
}

/// Drops every label starting with one of the prefixes.
pub struct WithoutLabelPrefixes {
    prefixes: Vec<String>,
}

impl WithoutLabelPrefixes {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }
}

impl ResourceMapper for WithoutLabelPrefixes {
    fn map(&self, _features: &Features, mut resource: Resource) -> SyncResult<Resource> {
        if !self.prefixes.is_empty() {
            resource
                .meta
                .labels
                .retain(|k, _| !self.prefixes.iter().any(|p| k.starts_with(p.as_str())));
        }
        Ok(resource)
    }
}

/// Strips the status; status is local to the control plane computing it.
pub struct RemoveStatus;

impl ResourceMapper for RemoveStatus {
    fn map(&self, _features: &Features, mut resource: Resource) -> SyncResult<Resource> {
        resource.status = None;
        Ok(resource)
    }
}

/// Zeroes the `generation` of every entry in `spec.subscriptions`.
///
/// Subscription generations count local updates; left in place they would
/// make every insight look changed to the peer on each bump.
pub struct ZeroSubscriptionGeneration;

impl ResourceMapper for ZeroSubscriptionGeneration {
    fn map(&self, _features: &Features, mut resource: Resource) -> SyncResult<Resource> {
        let subscriptions = resource
            .spec
            .get_mut("subscriptions")
            .and_then(Value::as_array_mut);
        for sub in subscriptions.into_iter().flatten() {
            if let Some(generation) = sub.get_mut("generation") {
                *generation = json!(0);
            }
        }
        Ok(resource)
    }
}

// ---------------------------------------------------------------------------
// Hash-suffixed names
// ---------------------------------------------------------------------------

/// Name a resource is stored under on the peer: the display name followed by
/// a digest of the mesh, the display name and `values`, truncated to fit
/// [`MAX_NAME_LEN`].
pub fn hashed_name(mesh: &str, name: &str, values: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [mesh, name].iter().chain(values) {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    let digest = hex::encode(hasher.finalize().as_bytes());
    let suffix = &digest[..HASH_LEN];

    let mut end = name.len().min(MAX_NAME_LEN - HASH_LEN - 1);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}-{suffix}", &name[..end])
}

/// Renames a resource to its hashed name and records the original name in
/// the display-name label.
pub struct HashSuffix {
    require_feature: bool,
    labels: Vec<String>,
}

impl HashSuffix {
    /// With `require_feature`, names are only hashed for peers advertising
    /// the hash-suffix feature. `labels` are the labels whose values enter
    /// the digest.
    pub fn new<I, S>(require_feature: bool, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            require_feature,
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }
}

impl ResourceMapper for HashSuffix {
    fn map(&self, features: &Features, mut resource: Resource) -> SyncResult<Resource> {
        if self.require_feature && !features.has(HASH_SUFFIX) {
            return Ok(resource);
        }
        let display = resource
            .label(DISPLAY_NAME_LABEL)
            .unwrap_or(resource.name())
            .to_string();
        let values: Vec<&str> = self
            .labels
            .iter()
            .filter_map(|l| resource.label(l))
            .collect();
        let name = hashed_name(resource.mesh(), &display, &values);

        resource.meta.name = name;
        resource
            .meta
            .labels
            .insert(DISPLAY_NAME_LABEL.to_string(), display);
        Ok(resource)
    }
}

// ---------------------------------------------------------------------------
// Zone token signing keys
// ---------------------------------------------------------------------------

/// Replaces a zone token signing key with its public key. `spec.data` holds
/// the hex-encoded ed25519 seed; the result holds the hex-encoded public key
/// under the public-key name prefix.
pub struct SigningKeyToPublicKey;

impl ResourceMapper for SigningKeyToPublicKey {
    fn map(&self, _features: &Features, mut resource: Resource) -> SyncResult<Resource> {
        let fail = |reason: &str| SyncError::Mapping {
            resource_type: resource.resource_type.clone(),
            key: resource.key(),
            reason: reason.to_string(),
        };

        let seed_hex = resource
            .spec
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| fail("signing key data is missing"))?;
        let seed: [u8; 32] = hex::decode(seed_hex)
            .map_err(|_| fail("signing key data is not hex"))?
            .try_into()
            .map_err(|_| fail("signing key must be 32 bytes"))?;
        let public = ed25519_dalek::SigningKey::from_bytes(&seed).verifying_key();

        resource.meta.name = resource.meta.name.replacen(
            ZONE_TOKEN_SIGNING_KEY_PREFIX,
            ZONE_TOKEN_SIGNING_PUBLIC_KEY_PREFIX,
            1,
        );
        resource.spec = json!({ "data": hex::encode(public.to_bytes()) });
        Ok(resource)
    }
}
