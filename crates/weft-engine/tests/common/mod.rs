//! Shared fixtures: an in-memory class byte provider and class builders

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use weft_bytecode::{access, op, ClassFile, CodeAttribute, FieldType, MethodType};
use weft_engine::{ClassBytesProvider, ClassSource, LoaderId};

/// Serves class bytes from a map keyed by dotted name
#[derive(Default)]
pub struct MapProvider {
    classes: HashMap<String, Vec<u8>>,
    lookups: AtomicUsize,
}

impl MapProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, class: &ClassFile) -> Self {
        let name = class.name().unwrap().replace('/', ".");
        self.classes.insert(name, class.encode().unwrap());
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl ClassBytesProvider for MapProvider {
    fn find_class(&self, loader: Option<LoaderId>, class_name: &str) -> Option<ClassSource> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.classes.get(class_name).map(|bytes| ClassSource {
            loader,
            bytes: bytes.clone(),
        })
    }
}

/// A public class with a no-arg constructor
pub fn class(name: &str, super_name: &str, interfaces: &[&str]) -> ClassFile {
    let mut class = ClassFile::new(name, Some(super_name));
    for interface in interfaces {
        class.add_interface(interface);
    }
    let super_init = class.constant_pool.add_method_ref(super_name, "<init>", "()V");
    let [hi, lo] = super_init.to_be_bytes();
    let init = CodeAttribute::new(1, 1, vec![op::ALOAD_0, op::INVOKESPECIAL, hi, lo, op::RETURN]);
    class.add_method(access::PUBLIC, "<init>", "()V", Some(&init)).unwrap();
    class
}

/// A public interface
pub fn interface(name: &str, supers: &[&str]) -> ClassFile {
    let mut class = ClassFile::new(name, Some("java/lang/Object"));
    class.access_flags = access::PUBLIC | access::INTERFACE | access::ABSTRACT;
    for parent in supers {
        class.add_interface(parent);
    }
    class
}

/// Add an abstract interface method
pub fn abstract_method(class: &mut ClassFile, name: &str, descriptor: &str) {
    class.add_method(access::PUBLIC | access::ABSTRACT, name, descriptor, None).unwrap();
}

/// Add a method whose body returns the default value of its return type
pub fn default_method(class: &mut ClassFile, flags: u16, name: &str, descriptor: &str) {
    let method_type = MethodType::parse(descriptor).unwrap();
    let code = match &method_type.return_type {
        None => vec![op::RETURN],
        Some(FieldType::Long) => vec![op::LCONST_0, op::LRETURN],
        Some(FieldType::Float) => vec![op::FCONST_0, op::FRETURN],
        Some(FieldType::Double) => vec![op::DCONST_0, op::DRETURN],
        Some(t) if t.is_primitive() => vec![op::ICONST_0, op::IRETURN],
        Some(_) => vec![op::ACONST_NULL, op::ARETURN],
    };
    let receiver = if flags & access::STATIC != 0 { 0 } else { 1 };
    let attribute = CodeAttribute::new(2, method_type.parameter_slots() + receiver, code);
    class.add_method(flags, name, descriptor, Some(&attribute)).unwrap();
}

/// `java.util.List` and friends, trimmed to what matching needs
pub fn collections() -> MapProvider {
    let mut collection = interface("java/util/Collection", &[]);
    abstract_method(&mut collection, "add", "(Ljava/lang/Object;)Z");
    abstract_method(&mut collection, "size", "()I");

    let mut list = interface("java/util/List", &["java/util/Collection"]);
    abstract_method(&mut list, "add", "(Ljava/lang/Object;)Z");
    abstract_method(&mut list, "add", "(ILjava/lang/Object;)V");

    let mut abstract_list = class("java/util/AbstractList", "java/lang/Object", &["java/util/List"]);
    abstract_list.access_flags |= access::ABSTRACT;
    default_method(&mut abstract_list, access::PUBLIC, "add", "(Ljava/lang/Object;)Z");

    MapProvider::new()
        .with(&collection)
        .with(&list)
        .with(&abstract_list)
}

/// `java.util.ArrayList` with both `add` overloads and `size`
pub fn array_list() -> ClassFile {
    let mut class = class("java/util/ArrayList", "java/util/AbstractList", &["java/util/List"]);
    default_method(&mut class, access::PUBLIC, "add", "(Ljava/lang/Object;)Z");
    default_method(&mut class, access::PUBLIC, "add", "(ILjava/lang/Object;)V");
    default_method(&mut class, access::PUBLIC, "size", "()I");
    class
}
