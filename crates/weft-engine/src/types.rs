//! Type descriptor model
//!
//! A [`TypeDescriptor`] is an immutable snapshot of the parts of a class that
//! matching needs: its name, supertypes and declared methods. Names are kept
//! in dotted Java form (`java.util.ArrayList`).

use std::fmt;
use std::hash::{Hash, Hasher};
use weft_bytecode::{access, ClassFile, DecodeError, MethodType};

/// Identity of a class loader as reported by the host
///
/// The bootstrap loader has no identity and is written `None` wherever an
/// `Option<LoaderId>` appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(pub u64);

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loader#{}", self.0)
    }
}

/// Render an optional loader for log fields
pub(crate) fn loader_label(loader: Option<LoaderId>) -> String {
    match loader {
        Some(id) => id.to_string(),
        None => "bootstrap".to_string(),
    }
}

/// Convert an internal name (`java/lang/Object`) to dotted form
pub fn dotted(internal_name: &str) -> String {
    internal_name.replace('/', ".")
}

/// Convert a dotted name to internal form
pub fn internal(dotted_name: &str) -> String {
    dotted_name.replace('.', "/")
}

/// A declared method
///
/// Two descriptors are equal when name and argument types are equal; the
/// return type and modifiers do not take part, matching Java overload rules.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    name: String,
    argument_types: Vec<String>,
    return_type: String,
    modifiers: u16,
    descriptor: String,
}

impl MethodDescriptor {
    /// Build from a JVM method descriptor
    pub fn from_jvm(name: &str, descriptor: &str, modifiers: u16) -> Result<Self, DecodeError> {
        let method_type = MethodType::parse(descriptor)?;
        Ok(Self {
            name: name.to_string(),
            argument_types: method_type.parameters.iter().map(|p| p.java_name()).collect(),
            return_type: method_type
                .return_type
                .as_ref()
                .map(|r| r.java_name())
                .unwrap_or_else(|| "void".to_string()),
            modifiers,
            descriptor: descriptor.to_string(),
        })
    }

    /// Method name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Argument types in Java form
    pub fn argument_types(&self) -> &[String] {
        &self.argument_types
    }

    /// Return type in Java form, `void` for none
    pub fn return_type(&self) -> &str {
        &self.return_type
    }

    /// Whether the method returns nothing
    pub fn is_void(&self) -> bool {
        self.return_type == "void"
    }

    /// JVM access flags
    pub fn modifiers(&self) -> u16 {
        self.modifiers
    }

    /// Raw JVM descriptor
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Whether the method is static
    pub fn is_static(&self) -> bool {
        self.modifiers & access::STATIC != 0
    }

    /// Whether the method has no body of its own
    pub fn is_abstract(&self) -> bool {
        self.modifiers & access::ABSTRACT != 0
    }
}

impl PartialEq for MethodDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.argument_types == other.argument_types
    }
}

impl Eq for MethodDescriptor {}

impl Hash for MethodDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.argument_types.hash(state);
    }
}

/// Immutable snapshot of one class or interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: String,
    super_name: Option<String>,
    interface_names: Vec<String>,
    methods: Vec<MethodDescriptor>,
    is_interface: bool,
    is_missing: bool,
}

impl TypeDescriptor {
    /// Start building a descriptor
    pub fn builder(name: impl Into<String>) -> TypeDescriptorBuilder {
        TypeDescriptorBuilder::new(name)
    }

    /// Sentinel for a class whose bytes could not be found or parsed
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_name: None,
            interface_names: Vec::new(),
            methods: Vec::new(),
            is_interface: false,
            is_missing: true,
        }
    }

    /// Snapshot a decoded class file
    pub fn from_class_file(class: &ClassFile) -> Result<Self, DecodeError> {
        let pool = &class.constant_pool;
        let mut builder = TypeDescriptorBuilder::new(dotted(class.name()?));
        if let Some(super_name) = class.super_name()? {
            builder = builder.super_name(dotted(super_name));
        }
        for interface in class.interface_names()? {
            builder = builder.interface(dotted(interface));
        }
        for method in &class.methods {
            builder = builder.method(MethodDescriptor::from_jvm(
                method.name(pool)?,
                method.descriptor(pool)?,
                method.access_flags,
            )?);
        }
        Ok(builder.interface_flag(class.is_interface()).build())
    }

    /// Dotted class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Superclass name; `None` for `java.lang.Object`, interfaces and missing types
    pub fn super_name(&self) -> Option<&str> {
        self.super_name.as_deref()
    }

    /// Direct superinterfaces in declaration order
    pub fn interface_names(&self) -> &[String] {
        &self.interface_names
    }

    /// Declared methods
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// Whether this is an interface
    pub fn is_interface(&self) -> bool {
        self.is_interface
    }

    /// Whether this is the missing sentinel
    pub fn is_missing(&self) -> bool {
        self.is_missing
    }
}

/// Builder for [`TypeDescriptor`]
#[derive(Debug)]
pub struct TypeDescriptorBuilder {
    inner: TypeDescriptor,
}

impl TypeDescriptorBuilder {
    /// Create a builder for a class
    pub fn new(name: impl Into<String>) -> Self {
        let mut inner = TypeDescriptor::missing(name);
        inner.is_missing = false;
        Self { inner }
    }

    /// Set the superclass
    pub fn super_name(mut self, name: impl Into<String>) -> Self {
        self.inner.super_name = Some(name.into());
        self
    }

    /// Add a superinterface (duplicates are ignored)
    pub fn interface(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.inner.interface_names.contains(&name) {
            self.inner.interface_names.push(name);
        }
        self
    }

    /// Add a method
    ///
    /// A later method with the same name and argument types replaces an
    /// earlier bridge or synthetic one and is dropped otherwise, so covariant
    /// bridges never shadow the real declaration.
    pub fn method(mut self, method: MethodDescriptor) -> Self {
        let generated = access::BRIDGE | access::SYNTHETIC;
        match self.inner.methods.iter().position(|m| *m == method) {
            Some(index) => {
                let existing = &self.inner.methods[index];
                if existing.modifiers & generated != 0 && method.modifiers & generated == 0 {
                    self.inner.methods[index] = method;
                }
            }
            None => self.inner.methods.push(method),
        }
        self
    }

    /// Mark as interface
    pub fn interface_flag(mut self, is_interface: bool) -> Self {
        self.inner.is_interface = is_interface;
        self
    }

    /// Finish building
    pub fn build(mut self) -> TypeDescriptor {
        if self.inner.is_interface {
            // Interfaces record java/lang/Object as super in class files
            self.inner.super_name = None;
        }
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_bytecode::CodeAttribute;

    #[test]
    fn test_method_equality_ignores_return_type() {
        let a = MethodDescriptor::from_jvm("get", "()Ljava/lang/Object;", access::PUBLIC).unwrap();
        let b = MethodDescriptor::from_jvm("get", "()Ljava/lang/String;", access::PUBLIC).unwrap();
        assert_eq!(a, b);
        assert_eq!(b.return_type(), "java.lang.String");
    }

    #[test]
    fn test_bridge_does_not_shadow_declaration() {
        let bridge = MethodDescriptor::from_jvm(
            "get",
            "()Ljava/lang/Object;",
            access::PUBLIC | access::BRIDGE | access::SYNTHETIC,
        )
        .unwrap();
        let real = MethodDescriptor::from_jvm("get", "()Ljava/lang/String;", access::PUBLIC).unwrap();
        let descriptor = TypeDescriptor::builder("demo.Box").method(bridge).method(real).build();
        assert_eq!(descriptor.methods().len(), 1);
        assert_eq!(descriptor.methods()[0].return_type(), "java.lang.String");
    }

    #[test]
    fn test_from_class_file() {
        let mut class = ClassFile::new("demo/Widget", Some("demo/Base"));
        class.add_interface("java/lang/Runnable");
        class.add_method(
            access::PUBLIC,
            "resize",
            "(I[Ljava/lang/String;)V",
            Some(&CodeAttribute::new(0, 3, vec![weft_bytecode::op::RETURN])),
        )
        .unwrap();
        let descriptor = TypeDescriptor::from_class_file(&class).unwrap();
        assert_eq!(descriptor.name(), "demo.Widget");
        assert_eq!(descriptor.super_name(), Some("demo.Base"));
        assert_eq!(descriptor.interface_names(), &["java.lang.Runnable".to_string()]);
        let method = &descriptor.methods()[0];
        assert_eq!(method.argument_types(), &["int".to_string(), "java.lang.String[]".to_string()]);
        assert!(method.is_void());
        assert!(!descriptor.is_missing());
    }

    #[test]
    fn test_interface_has_no_super() {
        let descriptor = TypeDescriptor::builder("demo.Shape")
            .super_name("java.lang.Object")
            .interface_flag(true)
            .build();
        assert_eq!(descriptor.super_name(), None);
    }
}
