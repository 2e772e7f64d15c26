//! The primitive contract: every built-in operation (`+`, `-`, `*`, `<`,
//! `>`, `=`, `negate`, `field-get`, `field-set`) implements this trait once,
//! and each of the four passes (interpret, infer, generate, if-fuse) calls
//! through it rather than special-casing operation names.

use std::collections::HashMap;
use std::sync::Arc;

use kestrel_core::{Cat, CompilerError, ExprType, RuntimeError, Value};

use crate::writer::{Label, Writer};

/// One primitive operation. Implementors own all four facets; codegen and
/// the inferencer never special-case an operation name.
pub trait Primitive: Send + Sync {
    fn name(&self) -> &str;

    /// 1 for unary (`Primitive1`), 2 for binary (`Primitive2`).
    fn arity(&self) -> usize;

    /// Interpreter facet.
    fn apply(&self, args: &[Value]) -> Result<Value, RuntimeError>;

    /// Inferencer facet: a conservative return type as a function of
    /// argument types. Returning `Unknown` is always safe; a primitive that
    /// can't say anything sharper about `Unknown` arguments should do that
    /// rather than guess.
    fn inferred_return(&self, arg_types: &[ExprType]) -> ExprType;

    /// Codegen facet: emit code combining `arg_cats` (already on the
    /// operand stack, in order) and return the category of the result left
    /// on the stack. Must reject (not panic on, not silently coerce) any
    /// category combination with no defined semantics.
    fn generate(&self, writer: &mut dyn Writer, arg_cats: &[Cat]) -> Result<Cat, CompilerError>;

    /// If-fusion facet. Primitives with no conditional-jump form return
    /// `None` (the default); comparison primitives override this.
    fn as_if_aware(&self) -> Option<&dyn IfAware> {
        None
    }
}

/// Optional fourth facet: primitives usable directly as an `if` condition
/// without materializing a `Bool` first.
pub trait IfAware {
    /// Attempt to emit a fused compare-and-branch. `arg_cats` are the
    /// already-stack-resident operands. Returns `true` if it emitted a
    /// branch (to `then_label` on true, falling through to `else_label`
    /// otherwise is the caller's responsibility) and consumed the operands;
    /// `false` means the caller should fall back to `generate` + bridge to
    /// `Bool` + ordinary conditional jump.
    fn optimized_branch(
        &self,
        writer: &mut dyn Writer,
        arg_cats: &[Cat],
        then_label: Label,
        else_label: Label,
    ) -> bool;
}

fn unsupported(name: &str, cats: &[Cat]) -> CompilerError {
    CompilerError::UnsupportedCategories { primitive: name.to_string(), cats: cats.to_vec() }
}

fn need_int(v: &Value, context: &str) -> Result<i64, RuntimeError> {
    v.as_int().ok_or_else(|| RuntimeError::new(format!("{context}: expected integer, got {v}")))
}

macro_rules! arith_primitive {
    ($struct_name:ident, $name:literal, $op:tt) => {
        pub struct $struct_name;

        impl Primitive for $struct_name {
            fn name(&self) -> &str {
                $name
            }

            fn arity(&self) -> usize {
                2
            }

            fn apply(&self, args: &[Value]) -> Result<Value, RuntimeError> {
                let a = need_int(&args[0], $name)?;
                let b = need_int(&args[1], $name)?;
                Ok(Value::Int(a $op b))
            }

            fn inferred_return(&self, arg_types: &[ExprType]) -> ExprType {
                if arg_types.iter().all(|t| matches!(t, ExprType::Known(Cat::Int))) {
                    ExprType::Known(Cat::Int)
                } else {
                    ExprType::Unknown
                }
            }

            fn generate(&self, writer: &mut dyn Writer, arg_cats: &[Cat]) -> Result<Cat, CompilerError> {
                match arg_cats {
                    [Cat::Int, Cat::Int] => {
                        writer.apply_primitive(Arc::from($name), 2, Cat::Int);
                        Ok(Cat::Int)
                    }
                    _ => Err(unsupported($name, arg_cats)),
                }
            }
        }
    };
}

arith_primitive!(Add, "+", +);
arith_primitive!(Sub, "-", -);
arith_primitive!(Mul, "*", *);

/// Unary arithmetic negation.
pub struct Negate;

impl Primitive for Negate {
    fn name(&self) -> &str {
        "negate"
    }

    fn arity(&self) -> usize {
        1
    }

    fn apply(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        let a = need_int(&args[0], "negate")?;
        Ok(Value::Int(-a))
    }

    fn inferred_return(&self, arg_types: &[ExprType]) -> ExprType {
        if matches!(arg_types.first(), Some(ExprType::Known(Cat::Int))) {
            ExprType::Known(Cat::Int)
        } else {
            ExprType::Unknown
        }
    }

    fn generate(&self, writer: &mut dyn Writer, arg_cats: &[Cat]) -> Result<Cat, CompilerError> {
        match arg_cats {
            [Cat::Int] => {
                writer.apply_primitive(Arc::from("negate"), 1, Cat::Int);
                Ok(Cat::Int)
            }
            _ => Err(unsupported("negate", arg_cats)),
        }
    }
}

macro_rules! compare_primitive {
    ($struct_name:ident, $name:literal, $op:tt) => {
        pub struct $struct_name;

        impl Primitive for $struct_name {
            fn name(&self) -> &str {
                $name
            }

            fn arity(&self) -> usize {
                2
            }

            fn apply(&self, args: &[Value]) -> Result<Value, RuntimeError> {
                let a = need_int(&args[0], $name)?;
                let b = need_int(&args[1], $name)?;
                Ok(Value::Bool(a $op b))
            }

            fn inferred_return(&self, arg_types: &[ExprType]) -> ExprType {
                if arg_types.iter().all(|t| matches!(t, ExprType::Known(Cat::Int))) {
                    ExprType::Known(Cat::Bool)
                } else {
                    ExprType::Unknown
                }
            }

            fn generate(&self, writer: &mut dyn Writer, arg_cats: &[Cat]) -> Result<Cat, CompilerError> {
                match arg_cats {
                    [Cat::Int, Cat::Int] => {
                        writer.apply_primitive(Arc::from($name), 2, Cat::Bool);
                        Ok(Cat::Bool)
                    }
                    _ => Err(unsupported($name, arg_cats)),
                }
            }

            fn as_if_aware(&self) -> Option<&dyn IfAware> {
                Some(self)
            }
        }

        impl IfAware for $struct_name {
            fn optimized_branch(
                &self,
                writer: &mut dyn Writer,
                arg_cats: &[Cat],
                then_label: Label,
                else_label: Label,
            ) -> bool {
                if arg_cats != [Cat::Int, Cat::Int] {
                    return false;
                }
                writer.compare_and_branch($name, then_label, else_label);
                true
            }
        }
    };
}

compare_primitive!(Less, "<", <);
compare_primitive!(Greater, ">", >);

/// Structural equality. Accepts any matching pair of primitive categories;
/// two `Ref` operands are rejected (no general structural-equality
/// contract for boxed/string/closure values in this subsystem).
pub struct Equal;

impl Primitive for Equal {
    fn name(&self) -> &str {
        "="
    }

    fn arity(&self) -> usize {
        2
    }

    fn apply(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        match (&args[0], &args[1]) {
            (a, b) if a.is_int_like() && b.is_int_like() => {
                Ok(Value::Bool(a.as_int() == b.as_int()))
            }
            (a, b) if a.is_bool_like() && b.is_bool_like() => {
                Ok(Value::Bool(a.as_bool() == b.as_bool()))
            }
            _ => Err(RuntimeError::new("=: operands are not comparable primitives")),
        }
    }

    fn inferred_return(&self, arg_types: &[ExprType]) -> ExprType {
        match (arg_types.first(), arg_types.get(1)) {
            (Some(a), Some(b)) if a.is_primitive() && a == b => ExprType::Known(Cat::Bool),
            _ => ExprType::Unknown,
        }
    }

    fn generate(&self, writer: &mut dyn Writer, arg_cats: &[Cat]) -> Result<Cat, CompilerError> {
        match arg_cats {
            [Cat::Int, Cat::Int] | [Cat::Bool, Cat::Bool] => {
                writer.apply_primitive(Arc::from("="), 2, Cat::Bool);
                Ok(Cat::Bool)
            }
            _ => Err(unsupported("=", arg_cats)),
        }
    }

    fn as_if_aware(&self) -> Option<&dyn IfAware> {
        Some(self)
    }
}

impl IfAware for Equal {
    fn optimized_branch(
        &self,
        writer: &mut dyn Writer,
        arg_cats: &[Cat],
        then_label: Label,
        else_label: Label,
    ) -> bool {
        if arg_cats != [Cat::Int, Cat::Int] {
            return false;
        }
        writer.compare_and_branch("=", then_label, else_label);
        true
    }
}

/// Reads a named field off a `Ref` value. Field storage is an external
/// concern (the host's object representation); this subsystem only fixes
/// that field access goes through the same call/inline-cache machinery as
/// closure calls, keyed on field name rather than function identity.
pub struct FieldGet {
    pub field: Arc<str>,
}

impl Primitive for FieldGet {
    fn name(&self) -> &str {
        "field-get"
    }

    fn arity(&self) -> usize {
        1
    }

    fn apply(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        match &args[0] {
            Value::Ref(_) => Err(RuntimeError::new(format!(
                "field-get `{}`: field storage is a host concern, not modeled here",
                self.field
            ))),
            other => Err(RuntimeError::new(format!("field-get: {other} is not a reference value"))),
        }
    }

    fn inferred_return(&self, arg_types: &[ExprType]) -> ExprType {
        match arg_types.first() {
            Some(ExprType::Known(Cat::Ref)) => ExprType::Known(Cat::Ref),
            _ => ExprType::Unknown,
        }
    }

    fn generate(&self, writer: &mut dyn Writer, arg_cats: &[Cat]) -> Result<Cat, CompilerError> {
        match arg_cats {
            [Cat::Ref] => {
                writer.apply_primitive(Arc::from(format!("field-get:{}", self.field)), 1, Cat::Ref);
                Ok(Cat::Ref)
            }
            _ => Err(unsupported("field-get", arg_cats)),
        }
    }
}

/// Writes a named field on a `Ref` value.
pub struct FieldSet {
    pub field: Arc<str>,
}

impl Primitive for FieldSet {
    fn name(&self) -> &str {
        "field-set"
    }

    fn arity(&self) -> usize {
        2
    }

    fn apply(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        match &args[0] {
            Value::Ref(_) => Err(RuntimeError::new(format!(
                "field-set `{}`: field storage is a host concern, not modeled here",
                self.field
            ))),
            other => Err(RuntimeError::new(format!("field-set: {other} is not a reference value"))),
        }
    }

    fn inferred_return(&self, _arg_types: &[ExprType]) -> ExprType {
        ExprType::Known(Cat::Void)
    }

    fn generate(&self, writer: &mut dyn Writer, arg_cats: &[Cat]) -> Result<Cat, CompilerError> {
        match arg_cats {
            [Cat::Ref, _] => {
                writer.apply_primitive(Arc::from(format!("field-set:{}", self.field)), 2, Cat::Void);
                Ok(Cat::Void)
            }
            _ => Err(unsupported("field-set", arg_cats)),
        }
    }
}

/// A table mapping primitive names to implementations, the minimum
/// external contract an expression layer relies on (`+`, `-`, `*`,
/// `negate`, `<`, `>`, `=`, `field-get`, `field-set`).
#[derive(Default)]
pub struct PrimitiveRegistry {
    by_name: HashMap<String, Arc<dyn Primitive>>,
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the required primitives (field
    /// accessors are generic over field name, so none are pre-registered
    /// for a specific field here — `register_field_get`/`register_field_set`
    /// add one per field the expression layer actually uses).
    pub fn with_standard_primitives() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(Add));
        reg.register(Arc::new(Sub));
        reg.register(Arc::new(Mul));
        reg.register(Arc::new(Negate));
        reg.register(Arc::new(Less));
        reg.register(Arc::new(Greater));
        reg.register(Arc::new(Equal));
        reg
    }

    pub fn register(&mut self, p: Arc<dyn Primitive>) {
        self.by_name.insert(p.name().to_string(), p);
    }

    pub fn register_field_get(&mut self, field: impl Into<Arc<str>>) {
        let field = field.into();
        let name = format!("field-get:{field}");
        self.by_name.insert(name, Arc::new(FieldGet { field }));
    }

    pub fn register_field_set(&mut self, field: impl Into<Arc<str>>) {
        let field = field.into();
        let name = format!("field-set:{field}");
        self.by_name.insert(name, Arc::new(FieldSet { field }));
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<dyn Primitive>> {
        self.by_name.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_applies_and_infers() {
        let add = Add;
        assert_eq!(add.apply(&[Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
        assert_eq!(
            add.inferred_return(&[ExprType::Known(Cat::Int), ExprType::Known(Cat::Int)]),
            ExprType::Known(Cat::Int)
        );
        assert_eq!(add.inferred_return(&[ExprType::Unknown, ExprType::Known(Cat::Int)]), ExprType::Unknown);
    }

    #[test]
    fn less_is_if_aware() {
        let less = Less;
        assert!(less.as_if_aware().is_some());
        assert!(Add.as_if_aware().is_none());
    }

    #[test]
    fn equal_rejects_mixed_primitives() {
        let eq = Equal;
        assert!(eq.apply(&[Value::Int(1), Value::Bool(true)]).is_err());
    }

    #[test]
    fn equal_compares_matching_primitives() {
        let eq = Equal;
        assert_eq!(eq.apply(&[Value::Int(1), Value::Int(1)]).unwrap(), Value::Bool(true));
        assert_eq!(eq.apply(&[Value::Bool(true), Value::Bool(false)]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn registry_resolves_standard_names() {
        let reg = PrimitiveRegistry::with_standard_primitives();
        assert!(reg.lookup("+").is_some());
        assert!(reg.lookup("field-get").is_none());
        assert!(reg.lookup("no-such-primitive").is_none());
    }

    #[test]
    fn field_primitives_are_registered_per_field() {
        let mut reg = PrimitiveRegistry::new();
        reg.register_field_get("x");
        assert!(reg.lookup("field-get:x").is_some());
        assert!(reg.lookup("field-get:y").is_none());
    }
}
