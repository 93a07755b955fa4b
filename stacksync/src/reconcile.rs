//! Version reconciliation.
//!
//! A pass has three phases:
//! 1. **Aggregate**: resolve every repository's catalog into one map of
//!    stack identity to catalog versions. Any failure aborts the pass before
//!    anything is written.
//! 2. **Plan**: a pure function of the catalog map and the stored resources
//!    that yields the creates, updates and deletes needed.
//! 3. **Apply**: issue the mutations against the resource store, stopping at
//!    the first error.
//!
//! Version records with a desired state were set by an administrator. The
//! planner never edits or removes them; it only rebuilds the unpinned
//! records from the current catalogs.

use crate::config::PlatformInstance;
use crate::error::{ReconcileError, StoreError};
use crate::resource::{StackResource, VersionRecord};
use crate::source::CatalogResolver;
use crate::store::ResourceStore;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

/// Stack identity -> catalog versions, in repository order.
pub type CatalogMap = BTreeMap<String, Vec<VersionRecord>>;

pub fn aggregate(
    platform: &PlatformInstance,
    resolver: &dyn CatalogResolver,
) -> Result<CatalogMap, ReconcileError> {
    let mut catalog = CatalogMap::new();

    for repository in platform.repositories() {
        let index = resolver
            .resolve(platform, repository)
            .map_err(|source| ReconcileError::Resolve {
                repository: repository.name.clone(),
                source,
            })?;

        let url = repository.source_url();
        debug!(
            repository = %repository.name,
            stacks = index.stacks.len(),
            "resolved stack catalog"
        );
        for stack in &index.stacks {
            catalog
                .entry(stack.id.clone())
                .or_default()
                .push(VersionRecord::from_catalog(stack.version.clone(), url.clone()));
        }
    }

    Ok(catalog)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create(StackResource),
    Update(StackResource),
    Delete(StackResource),
}

impl Mutation {
    pub fn resource(&self) -> &StackResource {
        match self {
            Mutation::Create(resource)
            | Mutation::Update(resource)
            | Mutation::Delete(resource) => resource,
        }
    }

    pub fn describe(&self) -> String {
        let resource = self.resource();
        let versions = || {
            resource
                .versions()
                .iter()
                .map(describe_record)
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Mutation::Create(_) => format!("create {} [{}]", resource.name(), versions()),
            Mutation::Update(_) => format!("update {} [{}]", resource.name(), versions()),
            Mutation::Delete(_) => format!("delete {}", resource.name()),
        }
    }
}

fn describe_record(record: &VersionRecord) -> String {
    if record.is_pinned() {
        format!("{} ({})", record.version, record.desired_state)
    } else {
        record.version.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub mutations: Vec<Mutation>,
    pub unchanged: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Folds catalog versions into an existing version list. A version already in
/// the list only has its repository url refreshed, and only when it is not
/// pinned; new versions are appended.
pub fn merge_versions(
    mut versions: Vec<VersionRecord>,
    catalog: &[VersionRecord],
) -> Vec<VersionRecord> {
    for entry in catalog {
        let mut found = false;
        for record in versions.iter_mut().filter(|record| record.version == entry.version) {
            found = true;
            if !record.is_pinned() {
                record.repository_url = entry.repository_url.clone();
            }
        }

        if !found {
            versions.push(VersionRecord::from_catalog(
                entry.version.clone(),
                entry.repository_url.clone(),
            ));
        }
    }
    versions
}

/// Migrates legacy fields and keeps only pinned versions.
fn pinned_only(stored: &StackResource) -> StackResource {
    let mut desired = stored.clone();
    desired.spec.migrate_legacy();
    desired.spec.versions.retain(VersionRecord::is_pinned);
    desired
}

pub fn plan(
    platform: &PlatformInstance,
    catalog: &CatalogMap,
    current: &[StackResource],
) -> Plan {
    let mut result = Plan::default();
    let stored: BTreeMap<&str, &StackResource> = current
        .iter()
        .map(|resource| (resource.name(), resource))
        .collect();

    for (name, entries) in catalog {
        match stored.get(name.as_str()) {
            None => {
                let mut resource = StackResource::new(name.clone(), platform.namespace());
                resource.metadata.owner_references = vec![platform.owner_reference()];
                resource.spec.versions = merge_versions(Vec::new(), entries);
                result.mutations.push(Mutation::Create(resource));
            }
            Some(existing) => {
                let mut desired = pinned_only(existing);
                desired.spec.versions = merge_versions(desired.spec.versions, entries);
                push_update(&mut result, existing, desired);
            }
        }
    }

    let featured: BTreeSet<&str> = catalog.keys().map(String::as_str).collect();
    for existing in current
        .iter()
        .filter(|resource| !featured.contains(resource.name()))
    {
        let desired = pinned_only(existing);
        if desired.versions().is_empty() {
            result.mutations.push(Mutation::Delete(existing.clone()));
        } else {
            push_update(&mut result, existing, desired);
        }
    }

    result
}

fn push_update(plan: &mut Plan, existing: &StackResource, desired: StackResource) {
    if desired.same_content(existing) {
        plan.unchanged.push(existing.name().to_string());
    } else {
        plan.mutations.push(Mutation::Update(desired));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ReconcileReport {
    pub fn mutation_count(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} unchanged",
            self.created.len(),
            self.updated.len(),
            self.deleted.len(),
            self.unchanged.len()
        )
    }
}

pub fn apply(store: &dyn ResourceStore, plan: Plan) -> Result<ReconcileReport, StoreError> {
    let mut report = ReconcileReport {
        unchanged: plan.unchanged,
        ..ReconcileReport::default()
    };

    for mutation in plan.mutations {
        info!("{}", mutation.describe());
        match mutation {
            Mutation::Create(resource) => {
                store.create(&resource)?;
                report.created.push(resource.metadata.name);
            }
            Mutation::Update(resource) => {
                store.update(&resource)?;
                report.updated.push(resource.metadata.name);
            }
            Mutation::Delete(resource) => {
                store.delete(&resource)?;
                report.deleted.push(resource.metadata.name);
            }
        }
    }

    Ok(report)
}

/// Runs one full reconciliation pass for a platform instance.
pub fn reconcile(
    platform: &PlatformInstance,
    resolver: &dyn CatalogResolver,
    store: &dyn ResourceStore,
) -> Result<ReconcileReport, ReconcileError> {
    let catalog = aggregate(platform, resolver)?;
    let current = store.list(platform.namespace())?;
    let plan = plan(platform, &catalog, &current);
    let report = apply(store, plan)?;
    info!(platform = %platform.metadata.name, "reconciled stacks: {report}");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpsConfig, PlatformSpec, RepositoryConfig, StackConfig};
    use crate::error::{DecodeError, ResolveError};
    use crate::index::{Index, StackEntry};
    use crate::resource::{ObjectMeta, StackSpec};
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    const CATALOG_URL: &str = "https://example.com/index.yaml";

    fn platform(urls: &[&str]) -> PlatformInstance {
        PlatformInstance {
            api_version: "stacksync.io/v1alpha1".to_string(),
            kind: "Platform".to_string(),
            metadata: ObjectMeta {
                name: "platform".to_string(),
                namespace: "default".to_string(),
                uid: "12345".to_string(),
                ..ObjectMeta::default()
            },
            spec: PlatformSpec {
                stacks: StackConfig {
                    repositories: urls
                        .iter()
                        .enumerate()
                        .map(|(i, url)| RepositoryConfig {
                            name: format!("repo-{i}"),
                            https: HttpsConfig {
                                url: url.to_string(),
                                ..HttpsConfig::default()
                            },
                            ..RepositoryConfig::default()
                        })
                        .collect(),
                    ..StackConfig::default()
                },
                ..PlatformSpec::default()
            },
        }
    }

    /// Resolver serving canned catalogs keyed by repository url.
    struct StaticCatalogs(HashMap<String, Vec<(&'static str, &'static str)>>);

    impl CatalogResolver for StaticCatalogs {
        fn resolve(
            &self,
            _platform: &PlatformInstance,
            repository: &RepositoryConfig,
        ) -> Result<Index, ResolveError> {
            let entries = self
                .0
                .get(&repository.https.url)
                .ok_or(ResolveError::Decode(DecodeError::Empty))?;
            Ok(Index {
                stacks: entries
                    .iter()
                    .map(|(id, version)| StackEntry {
                        id: id.to_string(),
                        version: version.to_string(),
                        image: format!("docker.io/stacks/{id}"),
                        ..StackEntry::default()
                    })
                    .collect(),
                ..Index::default()
            })
        }
    }

    fn catalog(entries: &[(&str, &str, &str)]) -> CatalogMap {
        let mut map = CatalogMap::new();
        for (id, version, url) in entries {
            map.entry(id.to_string())
                .or_default()
                .push(VersionRecord::from_catalog(*version, *url));
        }
        map
    }

    fn existing(name: &str, version: &str, desired_state: &str) -> StackResource {
        let mut resource = StackResource::new(name, "default");
        resource.spec.versions = vec![VersionRecord {
            version: version.to_string(),
            repository_url: "http://example.com".to_string(),
            desired_state: desired_state.to_string(),
        }];
        resource.metadata.resource_version = 1;
        resource
    }

    fn only_mutation(plan: &Plan) -> &Mutation {
        assert_eq!(plan.mutations.len(), 1, "mutations: {:?}", plan.mutations);
        &plan.mutations[0]
    }

    #[test]
    fn aggregate_preserves_repository_order() {
        let resolver = StaticCatalogs(HashMap::from([
            (
                "https://one/index.yaml".to_string(),
                vec![("nodejs", "0.2.6"), ("java", "0.2.19")],
            ),
            (
                "https://two/index.yaml".to_string(),
                vec![("nodejs", "0.4.1")],
            ),
        ]));
        let platform = platform(&["https://one/index.yaml", "https://two/index.yaml"]);

        let catalog = aggregate(&platform, &resolver).expect("aggregate");
        assert_eq!(
            catalog["nodejs"],
            vec![
                VersionRecord::from_catalog("0.2.6", "https://one/index.yaml"),
                VersionRecord::from_catalog("0.4.1", "https://two/index.yaml"),
            ]
        );
        assert_eq!(catalog["java"].len(), 1);
    }

    #[test]
    fn aggregate_fails_when_any_repository_fails() {
        let resolver = StaticCatalogs(HashMap::from([(
            "https://one/index.yaml".to_string(),
            vec![("nodejs", "0.2.6")],
        )]));
        let platform = platform(&["https://one/index.yaml", "https://missing/index.yaml"]);

        let err = aggregate(&platform, &resolver).expect_err("aggregate");
        assert!(
            matches!(err, ReconcileError::Resolve { ref repository, .. } if repository == "repo-1")
        );
    }

    #[test]
    fn empty_store_gets_one_resource_per_identity() {
        let platform = platform(&[CATALOG_URL]);
        let catalog = catalog(&[("java", "1.0", CATALOG_URL), ("nodejs", "2.0", CATALOG_URL)]);

        let plan = plan(&platform, &catalog, &[]);
        assert_eq!(plan.mutations.len(), 2);

        for (mutation, (name, version)) in plan.mutations.iter().zip([("java", "1.0"), ("nodejs", "2.0")]) {
            let Mutation::Create(resource) = mutation else {
                panic!("expected create, got {mutation:?}");
            };
            assert_eq!(resource.name(), name);
            assert_eq!(
                resource.versions(),
                &[VersionRecord::from_catalog(version, CATALOG_URL)]
            );
            assert_eq!(resource.metadata.owner_references, vec![platform.owner_reference()]);
        }
    }

    #[test]
    fn pinned_version_stays_first() {
        let platform = platform(&[CATALOG_URL]);
        let catalog = catalog(&[("X", "2.0", CATALOG_URL)]);
        let current = vec![existing("X", "0.0.1", "active")];

        let plan = plan(&platform, &catalog, &current);
        let Mutation::Update(resource) = only_mutation(&plan) else {
            panic!("expected update");
        };

        assert_eq!(
            resource.versions(),
            &[
                VersionRecord {
                    version: "0.0.1".to_string(),
                    repository_url: "http://example.com".to_string(),
                    desired_state: "active".to_string(),
                },
                VersionRecord::from_catalog("2.0", CATALOG_URL),
            ]
        );
        assert_eq!(resource.version(), "0.0.1");
        assert_eq!(resource.desired_state(), "active");
        assert_eq!(resource.repository_url(), "http://example.com");
    }

    #[test]
    fn unpinned_versions_are_rebuilt_from_catalog() {
        let platform = platform(&[CATALOG_URL]);
        let catalog = catalog(&[("nodejs", "0.2.6", CATALOG_URL)]);
        let current = vec![existing("nodejs", "0.0.1", "")];

        let plan = plan(&platform, &catalog, &current);
        let Mutation::Update(resource) = only_mutation(&plan) else {
            panic!("expected update");
        };
        assert_eq!(
            resource.versions(),
            &[VersionRecord::from_catalog("0.2.6", CATALOG_URL)]
        );
        assert_eq!(resource.metadata.resource_version, 1);
    }

    #[test]
    fn pinned_same_version_keeps_its_url() {
        let platform = platform(&[CATALOG_URL]);
        let catalog = catalog(&[("java", "0.2.19", CATALOG_URL)]);
        let current = vec![existing("java", "0.2.19", "inactive")];

        let plan = plan(&platform, &catalog, &current);
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, vec!["java".to_string()]);
    }

    #[test]
    fn same_version_in_two_repositories_keeps_last_url() {
        let platform = platform(&["https://one", "https://two"]);
        let catalog = catalog(&[("nodejs", "1.0", "https://one"), ("nodejs", "1.0", "https://two")]);

        let plan = plan(&platform, &catalog, &[]);
        let Mutation::Create(resource) = only_mutation(&plan) else {
            panic!("expected create");
        };
        assert_eq!(
            resource.versions(),
            &[VersionRecord::from_catalog("1.0", "https://two")]
        );
    }

    #[test]
    fn unfeatured_unpinned_resource_is_deleted() {
        let platform = platform(&[CATALOG_URL]);
        let current = vec![existing("cobol", "0.0.1", "")];

        let plan = plan(&platform, &CatalogMap::new(), &current);
        assert!(matches!(only_mutation(&plan), Mutation::Delete(r) if r.name() == "cobol"));
    }

    #[test]
    fn unfeatured_pinned_resource_keeps_only_pins() {
        let platform = platform(&[CATALOG_URL]);
        let mut cobol = existing("cobol", "0.0.1", "active");
        cobol
            .spec
            .versions
            .push(VersionRecord::from_catalog("0.0.2", "http://example.com"));

        let plan = plan(&platform, &CatalogMap::new(), &[cobol]);
        let Mutation::Update(resource) = only_mutation(&plan) else {
            panic!("expected update");
        };
        assert_eq!(resource.versions().len(), 1);
        assert_eq!(resource.version(), "0.0.1");
        assert_eq!(resource.desired_state(), "active");
    }

    #[test]
    fn unfeatured_pinned_resource_already_pruned_is_unchanged() {
        let platform = platform(&[CATALOG_URL]);
        let plan = plan(
            &platform,
            &CatalogMap::new(),
            &[existing("cobol", "0.0.1", "active")],
        );
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, vec!["cobol".to_string()]);
    }

    #[test]
    fn legacy_resource_is_migrated_before_merge() {
        let platform = platform(&[CATALOG_URL]);
        let mut legacy = StackResource::new("java", "default");
        legacy.spec = StackSpec::legacy("java", "0.0.1", "http://example.com", "inactive");
        let catalog = catalog(&[("java", "0.2.19", CATALOG_URL)]);

        let plan = plan(&platform, &catalog, &[legacy]);
        let Mutation::Update(resource) = only_mutation(&plan) else {
            panic!("expected update");
        };
        assert!(!resource.spec.has_legacy_fields());
        assert_eq!(resource.versions().len(), 2);
        assert_eq!(resource.desired_state(), "inactive");
    }

    #[test]
    fn legacy_unpinned_resource_outside_catalog_is_deleted() {
        let platform = platform(&[CATALOG_URL]);
        let mut legacy = StackResource::new("cobol", "default");
        legacy.spec = StackSpec::legacy("cobol", "0.0.1", "http://example.com", "");

        let plan = plan(&platform, &CatalogMap::new(), &[legacy]);
        assert!(matches!(only_mutation(&plan), Mutation::Delete(_)));
    }

    #[test]
    fn reconcile_twice_is_idempotent() {
        let resolver = StaticCatalogs(HashMap::from([(
            CATALOG_URL.to_string(),
            vec![("nodejs", "0.2.6"), ("java", "0.2.19")],
        )]));
        let platform = platform(&[CATALOG_URL]);
        let store = MemoryStore::new();
        store
            .create(&existing("cobol", "0.0.1", "active"))
            .expect("seed");

        let first = reconcile(&platform, &resolver, &store).expect("first pass");
        assert_eq!(first.created, vec!["java".to_string(), "nodejs".to_string()]);

        let second = reconcile(&platform, &resolver, &store).expect("second pass");
        assert_eq!(second.mutation_count(), 0);
        assert_eq!(second.unchanged.len(), 3);
    }

    #[test]
    fn failed_resolution_leaves_store_untouched() {
        let resolver = StaticCatalogs(HashMap::new());
        let platform = platform(&[CATALOG_URL]);
        let store = MemoryStore::new();
        store
            .create(&existing("cobol", "0.0.1", ""))
            .expect("seed");

        reconcile(&platform, &resolver, &store).expect_err("resolution fails");
        assert_eq!(store.list("default").expect("list").len(), 1);
    }

    /// Store whose updates always lose the revision race.
    #[derive(Default)]
    struct ConflictingStore {
        resources: Vec<StackResource>,
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl ConflictingStore {
        fn record(&self, call: String) {
            self.calls.lock().expect("lock").push(call);
        }
    }

    impl ResourceStore for ConflictingStore {
        fn get(&self, name: &str, namespace: &str) -> Result<StackResource, StoreError> {
            Err(StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
        }

        fn list(&self, _namespace: &str) -> Result<Vec<StackResource>, StoreError> {
            Ok(self.resources.clone())
        }

        fn create(&self, resource: &StackResource) -> Result<StackResource, StoreError> {
            self.record(format!("create {}", resource.name()));
            Ok(resource.clone())
        }

        fn update(&self, resource: &StackResource) -> Result<StackResource, StoreError> {
            self.record(format!("update {}", resource.name()));
            Err(StoreError::Conflict {
                name: resource.name().to_string(),
                expected: resource.metadata.resource_version,
                actual: resource.metadata.resource_version + 1,
            })
        }

        fn delete(&self, resource: &StackResource) -> Result<(), StoreError> {
            self.record(format!("delete {}", resource.name()));
            Ok(())
        }
    }

    #[test]
    fn failed_update_stops_before_garbage_collection() {
        let resolver = StaticCatalogs(HashMap::from([(
            CATALOG_URL.to_string(),
            vec![("nodejs", "0.2.6")],
        )]));
        let platform = platform(&[CATALOG_URL]);
        let store = ConflictingStore {
            resources: vec![
                existing("cobol", "0.0.1", ""),
                existing("nodejs", "0.0.1", ""),
            ],
            ..ConflictingStore::default()
        };

        let err = reconcile(&platform, &resolver, &store).expect_err("conflict");
        assert!(matches!(
            err,
            ReconcileError::Store(StoreError::Conflict { .. })
        ));
        assert_eq!(
            store.calls.lock().expect("lock").as_slice(),
            &["update nodejs".to_string()]
        );
    }

    #[test]
    fn deletes_are_planned_last() {
        let platform = platform(&[CATALOG_URL]);
        let catalog = catalog(&[("nodejs", "0.2.6", CATALOG_URL)]);
        let current = vec![
            existing("cobol", "0.0.1", ""),
            existing("nodejs", "0.0.1", ""),
        ];

        let plan = plan(&platform, &catalog, &current);
        assert!(matches!(plan.mutations.last(), Some(Mutation::Delete(r)) if r.name() == "cobol"));
        assert!(matches!(plan.mutations[0], Mutation::Update(_)));
    }

    #[test]
    fn describe_mentions_pins() {
        let mutation = Mutation::Update(existing("java", "0.0.1", "inactive"));
        assert_eq!(mutation.describe(), "update java [0.0.1 (inactive)]");
        let mutation = Mutation::Delete(existing("cobol", "0.0.1", ""));
        assert_eq!(mutation.describe(), "delete cobol");
    }
}
