//! Advice declarations
//!
//! Advice is described as plain data ([`AdviceSpec`]) and validated once into
//! an [`Advice`]. Every rule about which callback may bind what is enforced
//! here, so the weaver can assume all advice it receives is well formed.

use crate::error::{DeclarationError, DeclarationResult};
use crate::pattern::{build_pattern, Pattern};
use serde::{Deserialize, Serialize};
use std::fmt;
use weft_bytecode::{FieldType, MethodType};

/// The five callback slots of an advice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackRole {
    /// Decides whether the advice runs for this invocation
    IsEnabled,
    /// Before the original body
    OnBefore,
    /// After a normal return
    OnReturn,
    /// After the body threw
    OnThrow,
    /// After either outcome
    OnAfter,
}

impl CallbackRole {
    /// All roles in slot order
    pub const ALL: [CallbackRole; 5] = [
        CallbackRole::IsEnabled,
        CallbackRole::OnBefore,
        CallbackRole::OnReturn,
        CallbackRole::OnThrow,
        CallbackRole::OnAfter,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    fn allows(self, kind: BindingKind) -> bool {
        use BindingKind::*;
        match kind {
            Receiver | Argument | ArgumentArray | MethodName => true,
            ReturnValue => self == CallbackRole::OnReturn,
            Thrown => self == CallbackRole::OnThrow,
            Traveler => matches!(
                self,
                CallbackRole::OnReturn | CallbackRole::OnThrow | CallbackRole::OnAfter
            ),
        }
    }
}

impl fmt::Display for CallbackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallbackRole::IsEnabled => "is_enabled",
            CallbackRole::OnBefore => "on_before",
            CallbackRole::OnReturn => "on_return",
            CallbackRole::OnThrow => "on_throw",
            CallbackRole::OnAfter => "on_after",
        };
        f.write_str(name)
    }
}

/// What a callback parameter receives, as declared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    /// The target instance
    Receiver,
    /// The next method argument (first declared binds argument 0, and so on)
    Argument,
    /// All arguments as `Object[]`
    ArgumentArray,
    /// The method name
    MethodName,
    /// The value returned by the original body
    ReturnValue,
    /// The throwable raised by the original body
    Thrown,
    /// The value produced by `on_before`
    Traveler,
}

impl BindingKind {
    fn label(self) -> &'static str {
        match self {
            BindingKind::Receiver => "the receiver",
            BindingKind::Argument => "a method argument",
            BindingKind::ArgumentArray => "the argument array",
            BindingKind::MethodName => "the method name",
            BindingKind::ReturnValue => "the return value",
            BindingKind::Thrown => "the thrown exception",
            BindingKind::Traveler => "the traveler",
        }
    }
}

/// Method modifier requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    /// Method must be public
    Public,
    /// Method must be static
    Static,
    /// Method must not be static
    NotStatic,
}

/// One declared callback parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// What the parameter receives
    pub binding: BindingKind,
    /// Declared Java type (`int`, `java.lang.Object[]`)
    #[serde(rename = "type")]
    pub type_name: String,
}

/// One declared callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackSpec {
    /// Slot the callback fills
    pub role: CallbackRole,
    /// Class declaring the static callback method (dotted)
    pub owner: String,
    /// Static method name
    pub method: String,
    /// Parameters in declaration order
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Declared return type, `void` for none
    #[serde(default = "default_return_type")]
    pub return_type: String,
}

fn default_return_type() -> String {
    "void".to_string()
}

impl CallbackSpec {
    /// A parameterless void callback
    pub fn new(role: CallbackRole, owner: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            role,
            owner: owner.into(),
            method: method.into(),
            parameters: Vec::new(),
            return_type: default_return_type(),
        }
    }

    /// Append a parameter
    pub fn param(mut self, binding: BindingKind, type_name: impl Into<String>) -> Self {
        self.parameters.push(ParameterSpec {
            binding,
            type_name: type_name.into(),
        });
        self
    }

    /// Set the return type
    pub fn returns(mut self, type_name: impl Into<String>) -> Self {
        self.return_type = type_name.into();
        self
    }
}

/// Structural description of an advice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviceSpec {
    /// Name used in diagnostics (defaults to the patterns)
    #[serde(default)]
    pub name: Option<String>,
    /// Class name pattern
    pub class_name: String,
    /// Method name pattern
    pub method_name: String,
    /// Argument type patterns; a trailing `..` matches any remaining arguments
    #[serde(default)]
    pub parameter_types: Vec<String>,
    /// Optional return type pattern
    #[serde(default)]
    pub return_type: Option<String>,
    /// Modifier requirements
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    /// Whether the advice fires again inside its own call tree
    #[serde(default = "default_capture_nested")]
    pub capture_nested: bool,
    /// Callbacks, at most one per role
    #[serde(default)]
    pub callbacks: Vec<CallbackSpec>,
}

fn default_capture_nested() -> bool {
    true
}

impl AdviceSpec {
    /// Advice for methods named `method_name` in classes named `class_name`
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            name: None,
            class_name: class_name.into(),
            method_name: method_name.into(),
            parameter_types: Vec::new(),
            return_type: None,
            modifiers: Vec::new(),
            capture_nested: true,
            callbacks: Vec::new(),
        }
    }

    /// Set the diagnostic name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the argument type patterns
    pub fn parameter_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the return type pattern
    pub fn return_type(mut self, pattern: impl Into<String>) -> Self {
        self.return_type = Some(pattern.into());
        self
    }

    /// Add a modifier requirement
    pub fn modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Set `capture_nested`
    pub fn capture_nested(mut self, capture: bool) -> Self {
        self.capture_nested = capture;
        self
    }

    /// Add a callback
    pub fn callback(mut self, callback: CallbackSpec) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Validate into an [`Advice`]
    pub fn build(self) -> DeclarationResult<Advice> {
        Advice::from_spec(self)
    }
}

/// A validated parameter binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    /// The target instance
    Receiver,
    /// Method argument at this index
    Argument(usize),
    /// All arguments as `Object[]`
    ArgumentArray,
    /// The method name
    MethodName,
    /// The original return value
    ReturnValue,
    /// The original throwable
    Thrown,
    /// The advice's traveler
    Traveler,
}

/// A validated callback parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// What is passed
    pub binding: Binding,
    /// Declared type
    pub ty: FieldType,
}

/// A validated callback: a static method to invoke
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    /// Slot it fills
    pub role: CallbackRole,
    /// Owner class in internal form
    pub owner: String,
    /// Method name
    pub name: String,
    /// Parameters in order
    pub parameters: Vec<Parameter>,
    /// Return type, `None` for void
    pub return_type: Option<FieldType>,
}

impl Callback {
    /// JVM method descriptor of the callback
    pub fn descriptor(&self) -> String {
        MethodType::new(
            self.parameters.iter().map(|p| p.ty.clone()).collect(),
            self.return_type.clone(),
        )
        .descriptor()
    }
}

/// One argument type pattern
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterPattern {
    /// Matches one argument type
    Type(Pattern),
    /// `..`: matches any remaining arguments
    Rest,
}

/// A validated advice
#[derive(Debug, Clone)]
pub struct Advice {
    name: String,
    class_pattern: Pattern,
    method_pattern: Pattern,
    parameter_patterns: Vec<ParameterPattern>,
    return_pattern: Option<Pattern>,
    modifiers: Vec<Modifier>,
    capture_nested: bool,
    callbacks: [Option<Callback>; 5],
}

impl Advice {
    /// Validate a structural description
    pub fn from_spec(spec: AdviceSpec) -> DeclarationResult<Self> {
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("{}.{}", spec.class_name, spec.method_name));

        let class_pattern = build_pattern(&spec.class_name)?;
        let method_pattern = build_pattern(&spec.method_name)?;

        let mut parameter_patterns = Vec::with_capacity(spec.parameter_types.len());
        for (i, text) in spec.parameter_types.iter().enumerate() {
            if text.trim() == ".." {
                if i + 1 != spec.parameter_types.len() {
                    return Err(DeclarationError::InvalidPattern {
                        pattern: text.clone(),
                        reason: "'..' must be the last parameter type".to_string(),
                    });
                }
                parameter_patterns.push(ParameterPattern::Rest);
            } else {
                parameter_patterns.push(ParameterPattern::Type(build_pattern(text.trim())?));
            }
        }
        let return_pattern = spec.return_type.as_deref().map(build_pattern).transpose()?;

        let mut callbacks: [Option<Callback>; 5] = Default::default();
        for callback_spec in &spec.callbacks {
            let slot = callback_spec.role.slot();
            if callbacks[slot].is_some() {
                return Err(DeclarationError::AmbiguousCallback {
                    advice: name,
                    role: callback_spec.role,
                });
            }
            callbacks[slot] = Some(validate_callback(&name, callback_spec)?);
        }

        let advice = Self {
            name,
            class_pattern,
            method_pattern,
            parameter_patterns,
            return_pattern,
            modifiers: spec.modifiers,
            capture_nested: spec.capture_nested,
            callbacks,
        };
        advice.check_travelers()?;
        Ok(advice)
    }

    fn check_travelers(&self) -> DeclarationResult<()> {
        let traveler = self.traveler_type();
        for role in [CallbackRole::OnReturn, CallbackRole::OnThrow, CallbackRole::OnAfter] {
            let Some(callback) = self.callback(role) else {
                continue;
            };
            for (index, parameter) in callback.parameters.iter().enumerate() {
                if parameter.binding != Binding::Traveler {
                    continue;
                }
                let Some(source) = traveler else {
                    return Err(DeclarationError::TravelerWithoutBefore {
                        advice: self.name.clone(),
                        role,
                    });
                };
                let compatible = if parameter.ty.is_primitive() {
                    *source == parameter.ty
                } else {
                    true
                };
                if !compatible {
                    return Err(DeclarationError::InvalidParameterType {
                        advice: self.name.clone(),
                        role,
                        index,
                        found: parameter.ty.java_name(),
                        expected: "the on_before return type",
                    });
                }
            }
        }
        Ok(())
    }

    /// Diagnostic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class name pattern
    pub fn class_pattern(&self) -> &Pattern {
        &self.class_pattern
    }

    /// Method name pattern
    pub fn method_pattern(&self) -> &Pattern {
        &self.method_pattern
    }

    /// Argument type patterns
    pub fn parameter_patterns(&self) -> &[ParameterPattern] {
        &self.parameter_patterns
    }

    /// Return type pattern
    pub fn return_pattern(&self) -> Option<&Pattern> {
        self.return_pattern.as_ref()
    }

    /// Modifier requirements
    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    /// Whether the advice fires for nested invocations
    pub fn capture_nested(&self) -> bool {
        self.capture_nested
    }

    /// The callback in `role`, if declared
    pub fn callback(&self, role: CallbackRole) -> Option<&Callback> {
        self.callbacks[role.slot()].as_ref()
    }

    /// All declared callbacks in slot order
    pub fn callbacks(&self) -> impl Iterator<Item = &Callback> + '_ {
        self.callbacks.iter().flatten()
    }

    /// Type of the traveler, if `on_before` returns one
    pub fn traveler_type(&self) -> Option<&FieldType> {
        self.callback(CallbackRole::OnBefore)
            .and_then(|c| c.return_type.as_ref())
    }
}

fn validate_callback(advice: &str, spec: &CallbackSpec) -> DeclarationResult<Callback> {
    let role = spec.role;
    let mut parameters = Vec::with_capacity(spec.parameters.len());
    let mut next_argument = 0;

    for (index, parameter) in spec.parameters.iter().enumerate() {
        let kind = parameter.binding;
        if !role.allows(kind) {
            return Err(DeclarationError::InvalidBinding {
                advice: advice.to_string(),
                role,
                binding: kind.label(),
                index,
            });
        }
        if matches!(kind, BindingKind::ReturnValue | BindingKind::Thrown) && index != 0 {
            return Err(DeclarationError::BindingNotFirst {
                advice: advice.to_string(),
                role,
                binding: kind.label(),
            });
        }

        let ty = parse_type(&parameter.type_name)?;
        let expected = match kind {
            BindingKind::ArgumentArray if ty != object_array() => Some("java.lang.Object[]"),
            BindingKind::MethodName if !is_one_of(&ty, &["java/lang/String", "java/lang/Object"]) => {
                Some("java.lang.String or java.lang.Object")
            }
            BindingKind::Thrown if !is_one_of(&ty, &["java/lang/Throwable", "java/lang/Object"]) => {
                Some("java.lang.Throwable or java.lang.Object")
            }
            BindingKind::Receiver if ty.is_primitive() => Some("a reference type"),
            _ => None,
        };
        if let Some(expected) = expected {
            return Err(DeclarationError::InvalidParameterType {
                advice: advice.to_string(),
                role,
                index,
                found: ty.java_name(),
                expected,
            });
        }

        let binding = match kind {
            BindingKind::Receiver => Binding::Receiver,
            BindingKind::Argument => {
                next_argument += 1;
                Binding::Argument(next_argument - 1)
            }
            BindingKind::ArgumentArray => Binding::ArgumentArray,
            BindingKind::MethodName => Binding::MethodName,
            BindingKind::ReturnValue => Binding::ReturnValue,
            BindingKind::Thrown => Binding::Thrown,
            BindingKind::Traveler => Binding::Traveler,
        };
        parameters.push(Parameter { binding, ty });
    }

    let return_type = match spec.return_type.trim() {
        "void" => None,
        other => Some(parse_type(other)?),
    };
    match role {
        CallbackRole::IsEnabled if return_type != Some(FieldType::Boolean) => {
            return Err(DeclarationError::IsEnabledNotBoolean {
                advice: advice.to_string(),
            });
        }
        CallbackRole::OnThrow | CallbackRole::OnAfter if return_type.is_some() => {
            return Err(DeclarationError::NonVoidReturn {
                advice: advice.to_string(),
                role,
            });
        }
        _ => {}
    }

    let owner = FieldType::from_java_name(&spec.owner)
        .ok()
        .and_then(|ty| match ty {
            FieldType::Object(internal) => Some(internal),
            _ => None,
        })
        .ok_or_else(|| DeclarationError::InvalidType(spec.owner.clone()))?;
    if spec.method.is_empty() || spec.method.contains(|c: char| ".;[/<>".contains(c)) {
        return Err(DeclarationError::InvalidType(format!("{}.{}", spec.owner, spec.method)));
    }

    Ok(Callback {
        role,
        owner,
        name: spec.method.clone(),
        parameters,
        return_type,
    })
}

fn parse_type(name: &str) -> DeclarationResult<FieldType> {
    FieldType::from_java_name(name).map_err(|_| DeclarationError::InvalidType(name.to_string()))
}

fn object_array() -> FieldType {
    FieldType::Array(Box::new(FieldType::object()))
}

fn is_one_of(ty: &FieldType, internal_names: &[&str]) -> bool {
    matches!(ty, FieldType::Object(name) if internal_names.contains(&name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &str = "demo.TimerAdvice";

    fn before() -> CallbackSpec {
        CallbackSpec::new(CallbackRole::OnBefore, OWNER, "onBefore").returns("long")
    }

    #[test]
    fn test_valid_advice() {
        let advice = AdviceSpec::new("java.util.ArrayList", "add")
            .parameter_types(["java.lang.Object"])
            .callback(before().param(BindingKind::Receiver, "java.lang.Object"))
            .callback(
                CallbackSpec::new(CallbackRole::OnReturn, OWNER, "onReturn")
                    .param(BindingKind::ReturnValue, "boolean")
                    .param(BindingKind::Traveler, "long"),
            )
            .callback(
                CallbackSpec::new(CallbackRole::OnAfter, OWNER, "onAfter")
                    .param(BindingKind::Argument, "java.lang.Object")
                    .param(BindingKind::Argument, "int"),
            )
            .build()
            .unwrap();

        assert_eq!(advice.traveler_type(), Some(&FieldType::Long));
        let after = advice.callback(CallbackRole::OnAfter).unwrap();
        assert_eq!(after.parameters[1].binding, Binding::Argument(1));
        assert_eq!(after.descriptor(), "(Ljava/lang/Object;I)V");
        assert_eq!(after.owner, "demo/TimerAdvice");
    }

    #[test]
    fn test_duplicate_role_is_ambiguous() {
        let result = AdviceSpec::new("a.B", "m").callback(before()).callback(before()).build();
        assert!(matches!(
            result,
            Err(DeclarationError::AmbiguousCallback {
                role: CallbackRole::OnBefore,
                ..
            })
        ));
    }

    #[test]
    fn test_return_value_must_be_first() {
        let result = AdviceSpec::new("a.B", "m")
            .callback(
                CallbackSpec::new(CallbackRole::OnReturn, OWNER, "onReturn")
                    .param(BindingKind::MethodName, "java.lang.String")
                    .param(BindingKind::ReturnValue, "java.lang.Object"),
            )
            .build();
        assert!(matches!(result, Err(DeclarationError::BindingNotFirst { .. })));
    }

    #[test]
    fn test_binding_not_allowed_for_role() {
        let result = AdviceSpec::new("a.B", "m")
            .callback(before().param(BindingKind::Thrown, "java.lang.Throwable"))
            .build();
        assert!(matches!(result, Err(DeclarationError::InvalidBinding { index: 0, .. })));
    }

    #[test]
    fn test_on_throw_must_be_void() {
        let result = AdviceSpec::new("a.B", "m")
            .callback(CallbackSpec::new(CallbackRole::OnThrow, OWNER, "onThrow").returns("int"))
            .build();
        assert!(matches!(result, Err(DeclarationError::NonVoidReturn { .. })));
    }

    #[test]
    fn test_is_enabled_must_return_boolean() {
        let result = AdviceSpec::new("a.B", "m")
            .callback(CallbackSpec::new(CallbackRole::IsEnabled, OWNER, "isEnabled"))
            .build();
        assert!(matches!(result, Err(DeclarationError::IsEnabledNotBoolean { .. })));
    }

    #[test]
    fn test_traveler_requires_before() {
        let result = AdviceSpec::new("a.B", "m")
            .callback(
                CallbackSpec::new(CallbackRole::OnAfter, OWNER, "onAfter")
                    .param(BindingKind::Traveler, "java.lang.Object"),
            )
            .build();
        assert!(matches!(result, Err(DeclarationError::TravelerWithoutBefore { .. })));
    }

    #[test]
    fn test_argument_array_type() {
        let result = AdviceSpec::new("a.B", "m")
            .callback(before().param(BindingKind::ArgumentArray, "java.lang.String[]"))
            .build();
        assert!(matches!(result, Err(DeclarationError::InvalidParameterType { .. })));
    }

    #[test]
    fn test_rest_must_be_last() {
        let result = AdviceSpec::new("a.B", "m").parameter_types(["..", "int"]).build();
        assert!(matches!(result, Err(DeclarationError::InvalidPattern { .. })));
    }

    #[test]
    fn test_spec_from_json() {
        let spec: AdviceSpec = serde_json::from_str(
            r#"{
                "class_name": "demo.*",
                "method_name": "run",
                "capture_nested": false,
                "callbacks": [
                    {"role": "on_before", "owner": "demo.Probe", "method": "enter",
                     "parameters": [{"binding": "method_name", "type": "java.lang.String"}]}
                ]
            }"#,
        )
        .unwrap();
        let advice = spec.build().unwrap();
        assert!(!advice.capture_nested());
        assert!(advice.callback(CallbackRole::OnBefore).is_some());
        assert!(advice.traveler_type().is_none());
    }
}
