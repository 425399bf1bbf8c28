//! Type hierarchy resolution
//!
//! Matching needs the ancestors of a class before any of them may have been
//! loaded, so the resolver reads ancestor bytes through a
//! [`ClassBytesProvider`] and caches one [`TypeDescriptor`] per
//! `(loader, class)`. Classes that cannot be found resolve to the missing
//! sentinel, which ends the walk along that branch.

use crate::types::{loader_label, LoaderId, TypeDescriptor};
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use weft_bytecode::ClassFile;

/// Class bytes located by a provider
#[derive(Debug, Clone)]
pub struct ClassSource {
    /// Loader that defines the class (may differ from the initiating loader)
    pub loader: Option<LoaderId>,
    /// Raw class file bytes
    pub bytes: Vec<u8>,
}

/// Resource lookup used to read ancestor classes
pub trait ClassBytesProvider: Send + Sync {
    /// Find the bytes of `class_name` (dotted) as seen from `loader`
    fn find_class(&self, loader: Option<LoaderId>, class_name: &str) -> Option<ClassSource>;
}

/// Provider that never finds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClassBytes;

impl ClassBytesProvider for NoClassBytes {
    fn find_class(&self, _loader: Option<LoaderId>, _class_name: &str) -> Option<ClassSource> {
        None
    }
}

type CacheKey = (Option<LoaderId>, String);

#[derive(Debug, Clone)]
struct CachedType {
    descriptor: Arc<TypeDescriptor>,
    defining_loader: Option<LoaderId>,
}

/// Concurrent, per-loader cache of type descriptors
pub struct HierarchyResolver {
    provider: Arc<dyn ClassBytesProvider>,
    cache: DashMap<CacheKey, CachedType>,
    warned: Mutex<FxHashSet<CacheKey>>,
}

impl HierarchyResolver {
    /// Create a resolver backed by `provider`
    pub fn new(provider: Arc<dyn ClassBytesProvider>) -> Self {
        Self {
            provider,
            cache: DashMap::new(),
            warned: Mutex::new(FxHashSet::default()),
        }
    }

    /// Cache the descriptor of a class being transformed
    pub fn register(&self, loader: Option<LoaderId>, descriptor: Arc<TypeDescriptor>) {
        let key = (loader, descriptor.name().to_string());
        self.cache.insert(
            key,
            CachedType {
                descriptor,
                defining_loader: loader,
            },
        );
    }

    /// Descriptor for `class_name` as seen from `loader`
    pub fn descriptor(&self, class_name: &str, loader: Option<LoaderId>) -> Arc<TypeDescriptor> {
        self.lookup(class_name, loader).descriptor
    }

    fn lookup(&self, class_name: &str, loader: Option<LoaderId>) -> CachedType {
        let key = (loader, class_name.to_string());
        if let Some(entry) = self.cache.get(&key) {
            return entry.value().clone();
        }

        // Computed outside any map lock; racing threads may both build the
        // same descriptor and the last insert wins.
        let resolved = self.load(class_name, loader);
        if resolved.defining_loader != loader && !resolved.descriptor.is_missing() {
            self.cache
                .insert((resolved.defining_loader, class_name.to_string()), resolved.clone());
        }
        self.cache.insert(key, resolved.clone());
        resolved
    }

    fn load(&self, class_name: &str, loader: Option<LoaderId>) -> CachedType {
        let source = match self.provider.find_class(loader, class_name) {
            Some(source) => source,
            None => return self.missing(class_name, loader, "class bytes not found"),
        };

        let parsed = ClassFile::decode(&source.bytes)
            .map_err(|e| e.to_string())
            .and_then(|class| TypeDescriptor::from_class_file(&class).map_err(|e| e.to_string()));
        match parsed {
            Ok(descriptor) if descriptor.name() == class_name => {
                debug!(class = class_name, loader = %loader_label(loader), "resolved ancestor");
                CachedType {
                    descriptor: Arc::new(descriptor),
                    defining_loader: source.loader,
                }
            }
            Ok(descriptor) => {
                let reason = format!("bytes define {}", descriptor.name());
                self.missing(class_name, loader, &reason)
            }
            Err(reason) => self.missing(class_name, loader, &reason),
        }
    }

    fn missing(&self, class_name: &str, loader: Option<LoaderId>, reason: &str) -> CachedType {
        let first = self.warned.lock().insert((loader, class_name.to_string()));
        if first {
            warn!(
                class = class_name,
                loader = %loader_label(loader),
                reason,
                "type unavailable for hierarchy resolution"
            );
        }
        CachedType {
            descriptor: Arc::new(TypeDescriptor::missing(class_name)),
            defining_loader: loader,
        }
    }

    /// All resolvable ancestors of `class_name`
    ///
    /// The superclass chain comes first, nearest first, followed by every
    /// interface reachable from the class and its superclasses, each directly
    /// followed by its own superinterfaces. The class itself and missing
    /// types are not included; no `(class, loader)` pair is visited twice.
    pub fn get_hierarchy(&self, class_name: &str, loader: Option<LoaderId>) -> Vec<Arc<TypeDescriptor>> {
        let start = self.lookup(class_name, loader);
        let mut visited: FxHashSet<CacheKey> = FxHashSet::default();
        visited.insert((loader, class_name.to_string()));

        let mut chain = vec![start.clone()];
        let mut current = start;
        while let Some(super_name) = current.descriptor.super_name() {
            let super_loader = current.defining_loader;
            if !visited.insert((super_loader, super_name.to_string())) {
                break;
            }
            let next = self.lookup(super_name, super_loader);
            if next.descriptor.is_missing() {
                break;
            }
            chain.push(next.clone());
            current = next;
        }

        let mut out: Vec<Arc<TypeDescriptor>> =
            chain.iter().skip(1).map(|c| c.descriptor.clone()).collect();
        for class in &chain {
            for interface in class.descriptor.interface_names() {
                self.visit_interface(interface, class.defining_loader, &mut visited, &mut out);
            }
        }
        out
    }

    fn visit_interface(
        &self,
        name: &str,
        loader: Option<LoaderId>,
        visited: &mut FxHashSet<CacheKey>,
        out: &mut Vec<Arc<TypeDescriptor>>,
    ) {
        if !visited.insert((loader, name.to_string())) {
            return;
        }
        let resolved = self.lookup(name, loader);
        if resolved.descriptor.is_missing() {
            return;
        }
        out.push(resolved.descriptor.clone());
        for parent in resolved.descriptor.interface_names() {
            self.visit_interface(parent, resolved.defining_loader, visited, out);
        }
    }

    /// Drop every entry initiated or defined by `loader`
    pub fn evict_loader(&self, loader: LoaderId) {
        self.cache
            .retain(|key, value| key.0 != Some(loader) && value.defining_loader != Some(loader));
        self.warned.lock().retain(|key| key.0 != Some(loader));
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
