//! In-memory collaborators for reconciliation tests
//!
//! `FakeCluster` behaves like a minimal API server: it assigns generations
//! and resource versions, enforces optimistic concurrency on update, filters
//! lists by label, and records every write attempt in order.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;

use mesh_operator::client::{ClusterClient, ControlPlaneApi, Propagation};
use mesh_operator::config::OperatorConfig;
use mesh_operator::controller::{Context, Error, ObjectHooks, ReconcileOutcome, Result};
use mesh_operator::crd::{ComponentStatus, ControlPlane, ControlPlaneStatus, ResourceKey};
use mesh_operator::manifest::{ManifestRenderer, RenderRequest, Renderings};
use mesh_operator::reconcile_instance;

use super::fixtures::{NAME, NS, create_test_control_plane};

/// Operations that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Update,
    Delete,
    List,
}

/// A write attempt, keyed by the object's `ResourceKey` text form
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Update(String),
    Delete(String, Propagation),
}

/// A list request: apiVersion, kind and namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListCall {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
}

fn api_version(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}

fn next_version(version: Option<&String>) -> String {
    let current: u64 = version.and_then(|v| v.parse().ok()).unwrap_or(0);
    (current + 1).to_string()
}

// =============================================================================
// Cluster
// =============================================================================

#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ResourceKey, DynamicObject>>,
    calls: Mutex<Vec<Call>>,
    lists: Mutex<Vec<ListCall>>,
    failures: Mutex<HashSet<(Op, String)>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a live object without recording a call
    pub fn insert(&self, mut object: DynamicObject) {
        let key = ResourceKey::from_object(&object).unwrap();
        object.metadata.generation.get_or_insert(1);
        object
            .metadata
            .resource_version
            .get_or_insert_with(|| "1".to_string());
        self.objects.lock().unwrap().insert(key, object);
    }

    pub fn object(&self, key: &str) -> Option<DynamicObject> {
        let key: ResourceKey = key.parse().unwrap();
        self.objects.lock().unwrap().get(&key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.object(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .map(ToString::to_string)
            .collect()
    }

    /// Make `op` fail for objects (or, for lists, kinds) named `name`
    pub fn fail(&self, op: Op, name: &str) {
        self.failures.lock().unwrap().insert((op, name.to_string()));
    }

    pub fn heal(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
        self.lists.lock().unwrap().clear();
    }

    pub fn lists(&self) -> Vec<ListCall> {
        self.lists.lock().unwrap().clone()
    }

    /// Delete calls in order, as key text
    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete(key, _) => Some(key),
                _ => None,
            })
            .collect()
    }

    fn check(&self, op: Op, name: &str) -> Result<()> {
        if self.failures.lock().unwrap().contains(&(op, name.to_string())) {
            return Err(Error::Conflict(format!("injected {op:?} failure for {name}")));
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get(&self, key: &ResourceKey) -> Result<Option<DynamicObject>> {
        self.check(Op::Get, key.name())?;
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let key = ResourceKey::from_object(object)?;
        self.record(Call::Create(key.to_string()));
        self.check(Op::Create, key.name())?;

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Error::Conflict(format!("{key} already exists")));
        }
        let mut created = object.clone();
        created.metadata.generation = Some(1);
        created.metadata.resource_version = Some("1".to_string());
        objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let key = ResourceKey::from_object(object)?;
        self.record(Call::Update(key.to_string()));
        self.check(Op::Update, key.name())?;

        let mut objects = self.objects.lock().unwrap();
        let live = objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if let Some(version) = &object.metadata.resource_version
            && Some(version) != live.metadata.resource_version.as_ref()
        {
            return Err(Error::Conflict(format!("{key} was modified")));
        }

        let mut updated = object.clone();
        let generation = live.metadata.generation.unwrap_or(1);
        let spec_changed = updated.data.get("spec") != live.data.get("spec");
        updated.metadata.generation = Some(generation + i64::from(spec_changed));
        updated.metadata.resource_version = Some(next_version(live.metadata.resource_version.as_ref()));
        objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &ResourceKey, propagation: Propagation) -> Result<()> {
        self.record(Call::Delete(key.to_string(), propagation));
        self.check(Op::Delete, key.name())?;
        match self.objects.lock().unwrap().remove(key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let api_version = api_version(gvk);
        self.lists.lock().unwrap().push(ListCall {
            api_version: api_version.clone(),
            kind: gvk.kind.clone(),
            namespace: namespace.map(str::to_string),
            labels: labels.clone(),
        });
        self.check(Op::List, &gvk.kind)?;

        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(key, _)| key.api_version() == api_version && key.kind() == gvk.kind)
            .filter(|(key, _)| namespace.is_none_or(|ns| key.namespace() == ns))
            .filter(|(_, object)| {
                let live = object.metadata.labels.clone().unwrap_or_default();
                labels.iter().all(|(k, v)| live.get(k) == Some(v))
            })
            .map(|(_, object)| object.clone())
            .collect())
    }
}

// =============================================================================
// ControlPlane API
// =============================================================================

/// Stores instances; removes an instance once it is deleting and has no
/// finalizers left
#[derive(Default)]
pub struct FakeControlPlanes {
    instances: Mutex<BTreeMap<(String, String), ControlPlane>>,
    status_writes: Mutex<usize>,
    fail_finalizers: Mutex<bool>,
    fail_status: Mutex<bool>,
}

impl FakeControlPlanes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, instance: ControlPlane) {
        let key = (
            instance.metadata.namespace.clone().unwrap_or_default(),
            instance.metadata.name.clone().unwrap_or_default(),
        );
        self.instances.lock().unwrap().insert(key, instance);
    }

    pub fn instance(&self, namespace: &str, name: &str) -> Option<ControlPlane> {
        self.instances
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn status(&self, namespace: &str, name: &str) -> ControlPlaneStatus {
        self.instance(namespace, name)
            .and_then(|cp| cp.status)
            .unwrap_or_default()
    }

    /// Simulate a spec edit
    pub fn bump_generation(&self, namespace: &str, name: &str) {
        let mut instances = self.instances.lock().unwrap();
        let cp = instances
            .get_mut(&(namespace.to_string(), name.to_string()))
            .unwrap();
        cp.metadata.generation = Some(cp.metadata.generation.unwrap_or(0) + 1);
        cp.metadata.resource_version = Some(next_version(cp.metadata.resource_version.as_ref()));
    }

    pub fn status_writes(&self) -> usize {
        *self.status_writes.lock().unwrap()
    }

    pub fn fail_finalizer_updates(&self, fail: bool) {
        *self.fail_finalizers.lock().unwrap() = fail;
    }

    pub fn fail_status_updates(&self, fail: bool) {
        *self.fail_status.lock().unwrap() = fail;
    }

    fn with_instance<T>(
        &self,
        instance: &ControlPlane,
        update: impl FnOnce(&mut ControlPlane) -> T,
    ) -> Result<T> {
        let key = (
            instance.metadata.namespace.clone().unwrap_or_default(),
            instance.metadata.name.clone().unwrap_or_default(),
        );
        let mut instances = self.instances.lock().unwrap();
        let stored = instances
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("{}/{}", key.0, key.1)))?;
        let value = update(stored);
        stored.metadata.resource_version =
            Some(next_version(stored.metadata.resource_version.as_ref()));
        Ok(value)
    }
}

#[async_trait]
impl ControlPlaneApi for FakeControlPlanes {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ControlPlane>> {
        Ok(self.instance(namespace, name))
    }

    async fn set_finalizers(&self, instance: &ControlPlane, finalizers: Vec<String>) -> Result<()> {
        if *self.fail_finalizers.lock().unwrap() {
            return Err(Error::Conflict("injected finalizer failure".to_string()));
        }
        let current = self.instance(
            instance.metadata.namespace.as_deref().unwrap_or_default(),
            instance.metadata.name.as_deref().unwrap_or_default(),
        );
        if current.and_then(|cp| cp.metadata.resource_version) != instance.metadata.resource_version {
            return Err(Error::Conflict("stale resourceVersion".to_string()));
        }

        let released = self.with_instance(instance, |stored| {
            stored.metadata.finalizers = (!finalizers.is_empty()).then_some(finalizers);
            stored.metadata.deletion_timestamp.is_some() && stored.metadata.finalizers.is_none()
        })?;
        if released {
            self.instances.lock().unwrap().retain(|_, cp| {
                cp.metadata.deletion_timestamp.is_none() || cp.metadata.finalizers.is_some()
            });
        }
        Ok(())
    }

    async fn update_status(
        &self,
        instance: &ControlPlane,
        status: &ControlPlaneStatus,
    ) -> Result<()> {
        if *self.fail_status.lock().unwrap() {
            return Err(Error::Conflict("injected status failure".to_string()));
        }
        *self.status_writes.lock().unwrap() += 1;
        self.with_instance(instance, |stored| stored.status = Some(status.clone()))
    }
}

// =============================================================================
// Renderer and hooks
// =============================================================================

pub struct StaticRenderer {
    output: Mutex<std::result::Result<Renderings, String>>,
    versions: Mutex<Vec<String>>,
}

impl StaticRenderer {
    pub fn new(renderings: Renderings) -> Arc<Self> {
        Arc::new(Self {
            output: Mutex::new(Ok(renderings)),
            versions: Mutex::new(Vec::new()),
        })
    }

    pub fn set(&self, renderings: Renderings) {
        *self.output.lock().unwrap() = Ok(renderings);
    }

    pub fn fail(&self, message: &str) {
        *self.output.lock().unwrap() = Err(message.to_string());
    }

    /// Versions requested so far
    pub fn requests(&self) -> Vec<String> {
        self.versions.lock().unwrap().clone()
    }
}

impl ManifestRenderer for StaticRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Renderings> {
        self.versions
            .lock()
            .unwrap()
            .push(request.version.to_string());
        self.output
            .lock()
            .unwrap()
            .clone()
            .map_err(Error::RenderError)
    }
}

/// Hooks that fail on demand and record post-processing callbacks
#[derive(Default)]
pub struct TestHooks {
    fail_patch: HashSet<String>,
    fail_post: bool,
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    components: Mutex<Vec<String>>,
}

impl TestHooks {
    /// Patch fails for objects with these names
    pub fn failing_patch(names: &[&str]) -> Self {
        Self {
            fail_patch: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Every post-processing hook fails
    pub fn failing_post_hooks() -> Self {
        Self {
            fail_post: true,
            ..Default::default()
        }
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn components(&self) -> Vec<String> {
        self.components.lock().unwrap().clone()
    }

    fn post(&self, log: &Mutex<Vec<String>>, entry: String) -> Result<()> {
        log.lock().unwrap().push(entry.clone());
        if self.fail_post {
            return Err(Error::HookError(format!("post hook failed for {entry}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectHooks for TestHooks {
    async fn patch_object(&self, _instance: &ControlPlane, object: &mut DynamicObject) -> Result<()> {
        let name = object.metadata.name.clone().unwrap_or_default();
        if self.fail_patch.contains(&name) {
            return Err(Error::HookError(format!("patch rejected {name}")));
        }
        Ok(())
    }

    async fn on_object_created(&self, _instance: &ControlPlane, object: &DynamicObject) -> Result<()> {
        let key = ResourceKey::from_object(object)?;
        self.post(&self.created, key.to_string())
    }

    async fn on_object_deleted(&self, _instance: &ControlPlane, key: &ResourceKey) -> Result<()> {
        self.post(&self.deleted, key.to_string())
    }

    async fn on_component_reconciled(
        &self,
        _instance: &ControlPlane,
        status: &ComponentStatus,
    ) -> Result<()> {
        self.post(&self.components, status.name.clone())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A context wired to in-memory collaborators, holding one finalized
/// instance `NS/NAME` at generation 1
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub control_planes: Arc<FakeControlPlanes>,
    pub renderer: Arc<StaticRenderer>,
    pub hooks: Arc<TestHooks>,
    pub ctx: Context,
}

impl Harness {
    pub fn new(renderings: Renderings) -> Self {
        Self::with_hooks(renderings, TestHooks::default())
    }

    pub fn with_hooks(renderings: Renderings, hooks: TestHooks) -> Self {
        let cluster = FakeCluster::new();
        let control_planes = FakeControlPlanes::new();
        let renderer = StaticRenderer::new(renderings);
        let hooks = Arc::new(hooks);
        control_planes.insert(create_test_control_plane(NAME, NS, 1));

        let ctx = Context::new(
            cluster.clone(),
            control_planes.clone(),
            renderer.clone(),
            OperatorConfig::default(),
        )
        .with_hooks(hooks.clone());

        Self {
            cluster,
            control_planes,
            renderer,
            hooks,
            ctx,
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        reconcile_instance(&self.ctx, NS, NAME).await
    }

    /// Reconcile and clear the recorded calls of this pass afterwards
    pub async fn settle(&self) {
        self.reconcile().await.unwrap();
        self.cluster.clear_calls();
    }

    pub fn status(&self) -> ControlPlaneStatus {
        self.control_planes.status(NS, NAME)
    }

    pub fn component(&self, name: &str) -> ComponentStatus {
        self.status()
            .component(name)
            .cloned()
            .unwrap_or_else(|| panic!("component {name} missing from status"))
    }
}
