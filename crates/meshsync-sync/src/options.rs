use std::fmt;
use std::sync::Arc;

use meshsync_store::OwnerRef;
use meshsync_types::Resource;

/// Predicate selecting the resources a reconciliation may touch.
pub type Prefilter = Arc<dyn Fn(&Resource) -> bool + Send + Sync>;

/// Options of one reconciliation call.
#[derive(Clone, Default)]
pub struct SyncOptions {
    /// Only resources accepted by the predicate are compared, on both sides.
    pub prefilter: Option<Prefilter>,
    /// Owner attached to every created resource. It must exist.
    pub owner: Option<OwnerRef>,
    /// Report `AlreadyExists` on create as a rejection instead of failing.
    pub skip_conflicts: bool,
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefilter_by(mut self, predicate: impl Fn(&Resource) -> bool + Send + Sync + 'static) -> Self {
        self.prefilter = Some(Arc::new(predicate));
        self
    }

    pub fn owned_by(mut self, owner: OwnerRef) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn skip_conflicts(mut self, skip: bool) -> Self {
        self.skip_conflicts = skip;
        self
    }

    /// Whether `resource` is inside the scope of the reconciliation.
    pub fn selects(&self, resource: &Resource) -> bool {
        self.prefilter.as_ref().map_or(true, |p| p(resource))
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("prefilter", &self.prefilter.is_some())
            .field("owner", &self.owner)
            .field("skip_conflicts", &self.skip_conflicts)
            .finish()
    }
}
