//! Attaching mixins to a class file

use super::codegen::{emit_load, return_opcode};
use crate::error::{TransformError, TransformResult};
use crate::hierarchy::HierarchyResolver;
use crate::mixin::Mixin;
use crate::types::{internal, LoaderId, MethodDescriptor};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use weft_bytecode::{access, instructions, op, ByteWriter, ClassFile, CodeAttribute, ConstantPool, MethodType};

/// Prefix of the fields holding mixin instances
pub const MIXIN_FIELD_PREFIX: &str = "weft$mixin$";

/// `Object` methods an interface may redeclare; never forwarded
const OBJECT_METHODS: [(&str, &str); 3] = [
    ("equals", "(Ljava/lang/Object;)Z"),
    ("hashCode", "()I"),
    ("toString", "()Ljava/lang/String;"),
];

struct Attached {
    field: String,
    implementation: String,
}

/// Attach `mixins` to `class`, returning how many were applied
///
/// A mixin whose interface cannot be resolved is skipped with a warning.
pub fn apply_mixins(
    class: &mut ClassFile,
    mixins: &[Arc<Mixin>],
    resolver: &HierarchyResolver,
    loader: Option<LoaderId>,
) -> TransformResult<usize> {
    let class_name = class.name()?.to_string();
    let mut attached = Vec::new();

    for mixin in mixins {
        let interface = resolver.descriptor(mixin.interface(), loader);
        if interface.is_missing() {
            warn!(
                class = %class_name,
                interface = mixin.interface(),
                "Mixin interface not found, skipping mixin"
            );
            continue;
        }
        let interface_internal = internal(mixin.interface());
        if !class.add_interface(&interface_internal) {
            continue;
        }

        let field = next_field_name(class);
        let implementation = internal(mixin.implementation());
        let field_descriptor = format!("L{};", implementation);
        class.add_field(access::PRIVATE | access::FINAL, &field, &field_descriptor);

        // The interface and its super-interfaces, nearest first
        let mut sources = vec![interface];
        sources.extend(
            resolver
                .get_hierarchy(mixin.interface(), loader)
                .into_iter()
                .filter(|t| t.is_interface()),
        );
        let mut seen = FxHashSet::default();
        for source in &sources {
            for method in source.methods() {
                if !needs_forwarder(class, method) || !seen.insert((method.name(), method.descriptor())) {
                    continue;
                }
                add_forwarder(class, &class_name, &field, &field_descriptor, &internal(source.name()), method)?;
            }
        }

        debug!(class = %class_name, interface = mixin.interface(), field = %field, "Attached mixin");
        attached.push(Attached {
            field,
            implementation,
        });
    }

    if !attached.is_empty() {
        prefix_constructors(class, &class_name, &attached)?;
    }
    Ok(attached.len())
}

fn next_field_name(class: &ClassFile) -> String {
    (0..)
        .map(|n| format!("{}{}", MIXIN_FIELD_PREFIX, n))
        .find(|name| !class.has_field(name))
        .unwrap_or_else(|| MIXIN_FIELD_PREFIX.to_string())
}

fn needs_forwarder(class: &ClassFile, method: &MethodDescriptor) -> bool {
    method.is_abstract()
        && !method.is_static()
        && !OBJECT_METHODS.contains(&(method.name(), method.descriptor()))
        && class.find_method(method.name(), method.descriptor()).is_none()
}

/// `aload_0; getfield; <args>; invokeinterface; return`
fn add_forwarder(
    class: &mut ClassFile,
    class_name: &str,
    field: &str,
    field_descriptor: &str,
    interface: &str,
    method: &MethodDescriptor,
) -> TransformResult<()> {
    let method_type = MethodType::parse(method.descriptor())?;
    let argument_slots = method_type.parameter_slots();
    let count = u8::try_from(argument_slots + 1).map_err(|_| TransformError::Unsupported {
        method: format!("{}.{}{}", class_name, method.name(), method.descriptor()),
        reason: "too many arguments to forward".to_string(),
    })?;

    let pool = &mut class.constant_pool;
    let field_ref = pool.add_field_ref(class_name, field, field_descriptor);
    let method_ref = pool.add_interface_method_ref(interface, method.name(), method.descriptor());

    let mut writer = ByteWriter::new();
    writer.emit_u8(op::ALOAD_0);
    writer.emit_u8(op::GETFIELD);
    writer.emit_u16(field_ref);
    let mut slot = 1;
    for parameter in &method_type.parameters {
        emit_load(&mut writer, parameter, slot);
        slot += parameter.slot_size();
    }
    writer.emit_u8(op::INVOKEINTERFACE);
    writer.emit_u16(method_ref);
    writer.emit_u8(count);
    writer.emit_u8(0);
    writer.emit_u8(return_opcode(method_type.return_type.as_ref()));

    let returned = method_type.return_type.as_ref().map_or(0, |t| t.slot_size());
    let max_stack = (argument_slots + 1).max(returned);
    let code = CodeAttribute::new(max_stack, argument_slots + 1, writer.into_bytes());
    class.add_method(access::PUBLIC, method.name(), method.descriptor(), Some(&code))?;
    Ok(())
}

/// Instantiate every attached implementation at the start of each constructor
///
/// Constructors that hand off to another constructor of the same class via
/// `this(...)` are left alone; the constructor they call does the work.
fn prefix_constructors(class: &mut ClassFile, class_name: &str, attached: &[Attached]) -> TransformResult<()> {
    let pool = &mut class.constant_pool;
    let mut writer = ByteWriter::new();
    for mixin in attached {
        let implementation = pool.add_class(&mixin.implementation);
        let constructor = pool.add_method_ref(&mixin.implementation, "<init>", "()V");
        let field = pool.add_field_ref(class_name, &mixin.field, &format!("L{};", mixin.implementation));
        writer.emit_u8(op::ALOAD_0);
        writer.emit_u8(op::NEW);
        writer.emit_u16(implementation);
        writer.emit_u8(op::DUP);
        writer.emit_u8(op::INVOKESPECIAL);
        writer.emit_u16(constructor);
        writer.emit_u8(op::PUTFIELD);
        writer.emit_u16(field);
    }
    // Keep tableswitch/lookupswitch padding intact
    while writer.offset() % 4 != 0 {
        writer.emit_u8(op::NOP);
    }
    let prefix = writer.into_bytes();

    for index in 0..class.methods.len() {
        let pool = &class.constant_pool;
        if class.methods[index].name(pool)? != "<init>" {
            continue;
        }
        let Some(mut code) = class.methods[index].code(pool)? else {
            continue;
        };
        if delegates_to_own_constructor(&code, pool, class_name)? {
            continue;
        }
        code.insert_prefix(&prefix, pool)?;
        code.max_stack = code.max_stack.max(3);
        class.methods[index].set_code(&mut class.constant_pool, &code)?;
    }
    Ok(())
}

/// Whether a constructor body initializes `this` through another
/// constructor of `class_name` rather than a superclass constructor
///
/// Each `new` pushes an object whose own `<init>` is consumed first, so the
/// first `<init>` call left unmatched is the one that targets `this`.
fn delegates_to_own_constructor(code: &CodeAttribute, pool: &ConstantPool, class_name: &str) -> TransformResult<bool> {
    let mut pending = 0usize;
    for insn in instructions(&code.code) {
        let insn = insn?;
        match insn.opcode {
            op::NEW => pending += 1,
            op::INVOKESPECIAL => {
                let Some(index) = insn.operand_u16(&code.code) else {
                    continue;
                };
                let (owner, name, _) = pool.member_ref(index)?;
                if name != "<init>" {
                    continue;
                }
                if pending == 0 {
                    return Ok(owner == class_name);
                }
                pending -= 1;
            }
            _ => {}
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{ClassBytesProvider, ClassSource};
    use crate::mixin::MixinSpec;
    use weft_bytecode::verify_class;

    struct Interfaces;

    impl ClassBytesProvider for Interfaces {
        fn find_class(&self, _loader: Option<LoaderId>, name: &str) -> Option<ClassSource> {
            let mut class = ClassFile::new(&internal(name), Some("java/lang/Object"));
            class.access_flags = access::PUBLIC | access::INTERFACE | access::ABSTRACT;
            match name {
                "demo.Tagged" => {
                    class.add_interface("demo/Named");
                    class.add_method(access::PUBLIC | access::ABSTRACT, "tag", "(I)Ljava/lang/String;", None).unwrap();
                    class.add_method(access::PUBLIC | access::ABSTRACT, "toString", "()Ljava/lang/String;", None).unwrap();
                }
                "demo.Named" => {
                    class.add_method(access::PUBLIC | access::ABSTRACT, "name", "()Ljava/lang/String;", None).unwrap();
                    class.add_method(access::PUBLIC | access::ABSTRACT, "weight", "(JD)J", None).unwrap();
                }
                _ => return None,
            }
            Some(ClassSource {
                loader: None,
                bytes: class.encode().unwrap(),
            })
        }
    }

    fn target() -> ClassFile {
        let mut class = ClassFile::new("demo/Target", Some("java/lang/Object"));
        let super_init = class.constant_pool.add_method_ref("java/lang/Object", "<init>", "()V");
        let [hi, lo] = super_init.to_be_bytes();
        let code = CodeAttribute::new(1, 1, vec![op::ALOAD_0, op::INVOKESPECIAL, hi, lo, op::RETURN]);
        class.add_method(access::PUBLIC, "<init>", "()V", Some(&code)).unwrap();
        // Already implemented, must not be forwarded
        let name = CodeAttribute::new(1, 1, vec![op::ACONST_NULL, op::ARETURN]);
        class.add_method(access::PUBLIC, "name", "()Ljava/lang/String;", Some(&name)).unwrap();
        class
    }

    fn mixin(interface: &str) -> Arc<Mixin> {
        Arc::new(MixinSpec::new("demo.Target", interface, "demo.TaggedImpl").build().unwrap())
    }

    #[test]
    fn test_apply_mixin() {
        let resolver = HierarchyResolver::new(Arc::new(Interfaces));
        let mut class = target();
        let applied = apply_mixins(&mut class, &[mixin("demo.Tagged")], &resolver, None).unwrap();
        assert_eq!(applied, 1);

        assert_eq!(class.interface_names().unwrap(), vec!["demo/Tagged"]);
        assert!(class.has_field("weft$mixin$0"));
        assert!(class.find_method("tag", "(I)Ljava/lang/String;").is_some());
        assert!(class.find_method("weight", "(JD)J").is_some());
        assert!(class.find_method("toString", "()Ljava/lang/String;").is_none());
        let names = class
            .methods
            .iter()
            .filter(|m| m.name(&class.constant_pool).unwrap() == "name")
            .count();
        assert_eq!(names, 1);

        let init = class.find_method("<init>", "()V").unwrap().code(&class.constant_pool).unwrap().unwrap();
        assert_eq!(init.code.len(), 12 + 5);
        assert_eq!(init.code[11], op::NOP);
        assert_eq!(init.max_stack, 3);

        let weight = class.find_method("weight", "(JD)J").unwrap().code(&class.constant_pool).unwrap().unwrap();
        let invoke = instructions(&weight.code)
            .map(|i| i.unwrap())
            .find(|i| i.opcode == op::INVOKEINTERFACE)
            .unwrap();
        assert_eq!(weight.code[invoke.pc + 3], 5);
        assert_eq!(weight.max_locals, 5);

        verify_class(&class).unwrap();
    }

    #[test]
    fn test_missing_interface_is_skipped() {
        let resolver = HierarchyResolver::new(Arc::new(Interfaces));
        let mut class = target();
        let before = class.encode().unwrap();
        let applied = apply_mixins(&mut class, &[mixin("demo.Unknown")], &resolver, None).unwrap();
        assert_eq!(applied, 0);
        assert_eq!(class.encode().unwrap(), before);
    }

    #[test]
    fn test_two_mixins_share_one_prefix() {
        let resolver = HierarchyResolver::new(Arc::new(Interfaces));
        let mut class = target();
        let applied = apply_mixins(&mut class, &[mixin("demo.Tagged"), mixin("demo.Named")], &resolver, None).unwrap();
        assert_eq!(applied, 2);
        assert!(class.has_field("weft$mixin$1"));
        let init = class.find_method("<init>", "()V").unwrap().code(&class.constant_pool).unwrap().unwrap();
        // 22 bytes of prefix padded to 24
        assert_eq!(init.code.len(), 24 + 5);
        verify_class(&class).unwrap();
    }

    #[test]
    fn test_delegating_constructor_is_not_prefixed() {
        let resolver = HierarchyResolver::new(Arc::new(Interfaces));
        let mut class = ClassFile::new("demo/Target", Some("java/lang/Object"));
        let pool = &mut class.constant_pool;
        let [sh, sl] = pool.add_method_ref("java/lang/Object", "<init>", "()V").to_be_bytes();
        let [th, tl] = pool.add_method_ref("demo/Target", "<init>", "(Ljava/lang/String;)V").to_be_bytes();
        let [nh, nl] = pool.add_class("demo/Target").to_be_bytes();
        let [oh, ol] = pool.add_method_ref("demo/Target", "<init>", "()V").to_be_bytes();

        // this(null)
        let delegating = CodeAttribute::new(2, 1, vec![op::ALOAD_0, op::ACONST_NULL, op::INVOKESPECIAL, th, tl, op::RETURN]);
        // super()
        let primary = CodeAttribute::new(1, 2, vec![op::ALOAD_0, op::INVOKESPECIAL, sh, sl, op::RETURN]);
        // new Target(); super()
        let building = CodeAttribute::new(
            3,
            2,
            vec![
                op::ALOAD_0, op::NEW, nh, nl, op::DUP, op::INVOKESPECIAL, oh, ol, op::POP, op::INVOKESPECIAL, sh, sl,
                op::RETURN,
            ],
        );
        class.add_method(access::PUBLIC, "<init>", "()V", Some(&delegating)).unwrap();
        class.add_method(access::PUBLIC, "<init>", "(Ljava/lang/String;)V", Some(&primary)).unwrap();
        class.add_method(access::PUBLIC, "<init>", "(I)V", Some(&building)).unwrap();

        apply_mixins(&mut class, &[mixin("demo.Named")], &resolver, None).unwrap();

        let body = |descriptor: &str| {
            class.find_method("<init>", descriptor).unwrap().code(&class.constant_pool).unwrap().unwrap().code
        };
        assert_eq!(body("()V").len(), 6);
        assert_eq!(body("(Ljava/lang/String;)V").len(), 12 + 5);
        assert_eq!(body("(I)V").len(), 12 + 13);
        verify_class(&class).unwrap();
    }
}
