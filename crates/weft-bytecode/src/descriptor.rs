//! JVM field and method descriptors (JVMS §4.3)
//!
//! Besides parsing and printing descriptors, this module converts between the
//! descriptor form (`Ljava/lang/String;`, `[I`) and the Java source form used
//! at the weaver's API surface (`java.lang.String`, `int[]`).

use crate::encoder::DecodeError;
use std::fmt;

/// A field type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `byte`
    Byte,
    /// `char`
    Char,
    /// `double`
    Double,
    /// `float`
    Float,
    /// `int`
    Int,
    /// `long`
    Long,
    /// `short`
    Short,
    /// `boolean`
    Boolean,
    /// Class or interface, internal name (`java/lang/Object`)
    Object(String),
    /// Array of the component type
    Array(Box<FieldType>),
}

impl FieldType {
    /// `java.lang.Object`
    pub fn object() -> Self {
        FieldType::Object("java/lang/Object".to_string())
    }

    /// Reference type for an internal class name
    pub fn class(internal_name: impl Into<String>) -> Self {
        FieldType::Object(internal_name.into())
    }

    /// Parse a single field descriptor
    pub fn parse(descriptor: &str) -> Result<Self, DecodeError> {
        let (ty, rest) = parse_field_type(descriptor)?;
        if !rest.is_empty() {
            return Err(malformed(descriptor));
        }
        Ok(ty)
    }

    /// Parse a Java source type name (`int`, `java.lang.String[]`)
    pub fn from_java_name(name: &str) -> Result<Self, DecodeError> {
        let name = name.trim();
        if let Some(component) = name.strip_suffix("[]") {
            return Ok(FieldType::Array(Box::new(Self::from_java_name(component)?)));
        }
        let ty = match name {
            "byte" => FieldType::Byte,
            "char" => FieldType::Char,
            "double" => FieldType::Double,
            "float" => FieldType::Float,
            "int" => FieldType::Int,
            "long" => FieldType::Long,
            "short" => FieldType::Short,
            "boolean" => FieldType::Boolean,
            "" | "void" => return Err(malformed(name)),
            other => {
                if other.contains(|c: char| c == '/' || c == ';' || c == '[' || c.is_whitespace()) {
                    return Err(malformed(name));
                }
                FieldType::Object(other.replace('.', "/"))
            }
        };
        Ok(ty)
    }

    /// Descriptor form (`I`, `Ljava/lang/String;`)
    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out);
        out
    }

    fn write_descriptor(&self, out: &mut String) {
        match self {
            FieldType::Byte => out.push('B'),
            FieldType::Char => out.push('C'),
            FieldType::Double => out.push('D'),
            FieldType::Float => out.push('F'),
            FieldType::Int => out.push('I'),
            FieldType::Long => out.push('J'),
            FieldType::Short => out.push('S'),
            FieldType::Boolean => out.push('Z'),
            FieldType::Object(name) => {
                out.push('L');
                out.push_str(name);
                out.push(';');
            }
            FieldType::Array(component) => {
                out.push('[');
                component.write_descriptor(out);
            }
        }
    }

    /// Java source form (`int`, `java.lang.String[]`)
    pub fn java_name(&self) -> String {
        match self {
            FieldType::Byte => "byte".to_string(),
            FieldType::Char => "char".to_string(),
            FieldType::Double => "double".to_string(),
            FieldType::Float => "float".to_string(),
            FieldType::Int => "int".to_string(),
            FieldType::Long => "long".to_string(),
            FieldType::Short => "short".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Object(name) => name.replace('/', "."),
            FieldType::Array(component) => format!("{}[]", component.java_name()),
        }
    }

    /// The name used in a `Class` constant for this type
    ///
    /// Classes use their internal name, arrays their descriptor. Primitives
    /// have no class constant.
    pub fn class_constant_name(&self) -> Option<String> {
        match self {
            FieldType::Object(name) => Some(name.clone()),
            FieldType::Array(_) => Some(self.descriptor()),
            _ => None,
        }
    }

    /// Whether this is a primitive type
    pub fn is_primitive(&self) -> bool {
        !self.is_reference()
    }

    /// Whether this is a class, interface or array type
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// Number of local variable / operand stack slots
    pub fn slot_size(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    /// Wrapper class used to box this primitive, if any
    pub fn box_class(&self) -> Option<&'static str> {
        match self {
            FieldType::Byte => Some("java/lang/Byte"),
            FieldType::Char => Some("java/lang/Character"),
            FieldType::Double => Some("java/lang/Double"),
            FieldType::Float => Some("java/lang/Float"),
            FieldType::Int => Some("java/lang/Integer"),
            FieldType::Long => Some("java/lang/Long"),
            FieldType::Short => Some("java/lang/Short"),
            FieldType::Boolean => Some("java/lang/Boolean"),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.java_name())
    }
}

/// A method descriptor: parameter types and optional return type (`None` = void)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodType {
    /// Parameter types in declaration order
    pub parameters: Vec<FieldType>,
    /// Return type, `None` for `void`
    pub return_type: Option<FieldType>,
}

impl MethodType {
    /// Build a method type from parts
    pub fn new(parameters: Vec<FieldType>, return_type: Option<FieldType>) -> Self {
        Self {
            parameters,
            return_type,
        }
    }

    /// Parse a method descriptor such as `(ILjava/lang/String;)V`
    pub fn parse(descriptor: &str) -> Result<Self, DecodeError> {
        let inner = descriptor
            .strip_prefix('(')
            .ok_or_else(|| malformed(descriptor))?;
        let close = inner.find(')').ok_or_else(|| malformed(descriptor))?;
        let (mut params_text, ret_text) = (&inner[..close], &inner[close + 1..]);

        let mut parameters = Vec::new();
        while !params_text.is_empty() {
            let (ty, rest) = parse_field_type(params_text)?;
            parameters.push(ty);
            params_text = rest;
        }

        let return_type = if ret_text == "V" {
            None
        } else {
            Some(FieldType::parse(ret_text)?)
        };

        Ok(Self {
            parameters,
            return_type,
        })
    }

    /// Descriptor form
    pub fn descriptor(&self) -> String {
        let mut out = String::from("(");
        for param in &self.parameters {
            param.write_descriptor(&mut out);
        }
        out.push(')');
        match &self.return_type {
            Some(ty) => ty.write_descriptor(&mut out),
            None => out.push('V'),
        }
        out
    }

    /// Total slots taken by the parameters (excluding any receiver)
    pub fn parameter_slots(&self) -> u16 {
        self.parameters.iter().map(FieldType::slot_size).sum()
    }
}

fn parse_field_type(text: &str) -> Result<(FieldType, &str), DecodeError> {
    let first = text.chars().next().ok_or_else(|| malformed(text))?;
    if !first.is_ascii() {
        return Err(malformed(text));
    }
    let rest = &text[1..];
    let ty = match first {
        'B' => FieldType::Byte,
        'C' => FieldType::Char,
        'D' => FieldType::Double,
        'F' => FieldType::Float,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'S' => FieldType::Short,
        'Z' => FieldType::Boolean,
        'L' => {
            let end = rest.find(';').ok_or_else(|| malformed(text))?;
            if end == 0 {
                return Err(malformed(text));
            }
            return Ok((FieldType::Object(rest[..end].to_string()), &rest[end + 1..]));
        }
        '[' => {
            let (component, rest) = parse_field_type(rest)?;
            return Ok((FieldType::Array(Box::new(component)), rest));
        }
        _ => return Err(malformed(text)),
    };
    Ok((ty, rest))
}

fn malformed(text: &str) -> DecodeError {
    DecodeError::Malformed {
        what: "descriptor",
        detail: format!("cannot parse {:?}", text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method_descriptor() {
        let ty = MethodType::parse("(I[Ljava/lang/String;J)Ljava/util/List;").unwrap();
        assert_eq!(ty.parameters.len(), 3);
        assert_eq!(ty.parameters[1].java_name(), "java.lang.String[]");
        assert_eq!(ty.parameter_slots(), 4);
        assert_eq!(ty.return_type.unwrap().java_name(), "java.util.List");
    }

    #[test]
    fn test_void_return() {
        let ty = MethodType::parse("()V").unwrap();
        assert!(ty.parameters.is_empty());
        assert!(ty.return_type.is_none());
        assert_eq!(ty.descriptor(), "()V");
    }

    #[test]
    fn test_java_names() {
        assert_eq!(FieldType::from_java_name("int[][]").unwrap().descriptor(), "[[I");
        assert_eq!(
            FieldType::from_java_name("java.lang.Object").unwrap(),
            FieldType::object()
        );
        assert!(FieldType::from_java_name("void").is_err());
        assert!(FieldType::from_java_name("java/lang/Object").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(MethodType::parse("(I").is_err());
        assert!(MethodType::parse("I)V").is_err());
        assert!(FieldType::parse("Ljava/lang/Object").is_err());
        assert!(FieldType::parse("II").is_err());
    }

    #[test]
    fn test_class_constant_names() {
        assert_eq!(
            FieldType::parse("[Ljava/lang/Object;").unwrap().class_constant_name().unwrap(),
            "[Ljava/lang/Object;"
        );
        assert_eq!(FieldType::Int.class_constant_name(), None);
    }
}
