//! Hierarchy resolution and class-level matching against provided class bytes

mod common;

use common::{array_list, class, collections, MapProvider};
use std::sync::Arc;
use std::thread;
use weft_engine::{
    AdviceRegistry, AdviceSpec, ClassBytesProvider, ClassSource, HierarchyResolver, LoaderId, MixinSpec,
    TypeDescriptor,
};

fn names(hierarchy: &[Arc<TypeDescriptor>]) -> Vec<String> {
    hierarchy.iter().map(|t| t.name().to_string()).collect()
}

#[test]
fn test_hierarchy_order() {
    let resolver = HierarchyResolver::new(Arc::new(collections().with(&array_list())));
    let hierarchy = resolver.get_hierarchy("java.util.ArrayList", Some(LoaderId(1)));
    assert_eq!(
        names(&hierarchy),
        vec!["java.util.AbstractList", "java.util.List", "java.util.Collection"]
    );
}

#[test]
fn test_concurrent_queries_agree() {
    let provider = Arc::new(collections().with(&array_list()));
    let resolver = Arc::new(HierarchyResolver::new(provider.clone()));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let resolver = resolver.clone();
            thread::spawn(move || names(&resolver.get_hierarchy("java.util.ArrayList", Some(LoaderId(1)))))
        })
        .collect();
    let results: Vec<Vec<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.iter().all(|r| r == &results[0]));
    assert_eq!(results[0].len(), 3);

    // ArrayList, AbstractList, List, Collection and the java.lang.Object sentinel
    assert_eq!(resolver.len(), 5);
    let settled = provider.lookups();
    resolver.get_hierarchy("java.util.ArrayList", Some(LoaderId(1)));
    assert_eq!(provider.lookups(), settled);
}

#[test]
fn test_missing_ancestor_stops_the_walk() {
    let orphan = class("demo/Orphan", "demo/Gone", &["demo/AlsoGone"]);
    let provider = Arc::new(MapProvider::new().with(&orphan));
    let resolver = HierarchyResolver::new(provider.clone());

    assert!(resolver.get_hierarchy("demo.Orphan", None).is_empty());
    assert!(resolver.descriptor("demo.Gone", None).is_missing());
    // Sentinels are cached; nothing is looked up again
    let settled = provider.lookups();
    assert!(resolver.get_hierarchy("demo.Orphan", None).is_empty());
    assert_eq!(provider.lookups(), settled);
}

/// Defines everything under `java.` in the bootstrap loader
struct Delegating(MapProvider);

impl ClassBytesProvider for Delegating {
    fn find_class(&self, loader: Option<LoaderId>, class_name: &str) -> Option<ClassSource> {
        let mut source = self.0.find_class(loader, class_name)?;
        if class_name.starts_with("java.") {
            source.loader = None;
        }
        Some(source)
    }
}

#[test]
fn test_defining_loader_is_cached_separately() {
    let app = class("demo/Repository", "java/util/AbstractList", &[]);
    let resolver = HierarchyResolver::new(Arc::new(Delegating(collections().with(&app))));

    let hierarchy = resolver.get_hierarchy("demo.Repository", Some(LoaderId(9)));
    assert_eq!(
        names(&hierarchy),
        vec!["java.util.AbstractList", "java.util.List", "java.util.Collection"]
    );

    // Dropping the application loader keeps what the bootstrap loader defined
    resolver.evict_loader(LoaderId(9));
    assert!(!resolver.is_empty());
    assert!(!resolver.descriptor("java.util.List", None).is_missing());
}

#[test]
fn test_class_level_match_through_ancestors() {
    let registry = AdviceRegistry::new(
        vec![
            AdviceSpec::new("java.util.Collection", "size").build().unwrap(),
            AdviceSpec::new("java.util.*Map", "get").build().unwrap(),
            AdviceSpec::new("/java\\.util\\.Abstract.*/", "add").build().unwrap(),
        ],
        vec![MixinSpec::new("java.util.List", "demo.Tagged", "demo.TaggedImpl").build().unwrap()],
    );
    let resolver = HierarchyResolver::new(Arc::new(collections().with(&array_list())));
    let class = resolver.descriptor("java.util.ArrayList", Some(LoaderId(1)));
    let hierarchy = resolver.get_hierarchy("java.util.ArrayList", Some(LoaderId(1)));

    let plan = registry.plan(&class, &hierarchy);
    let ids: Vec<usize> = plan.advice.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![0, 2]);
    // AbstractList already implements List, so it carries the mixin
    assert!(plan.mixins.is_empty());

    let abstract_list = resolver.descriptor("java.util.AbstractList", Some(LoaderId(1)));
    let parents = resolver.get_hierarchy("java.util.AbstractList", Some(LoaderId(1)));
    assert_eq!(registry.plan(&abstract_list, &parents).mixins.len(), 1);
}
