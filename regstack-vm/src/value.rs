use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::engine::runtime::{VmError, VmResult};

/// Nested structs deeper than this render as `{...}` and compare by identity,
/// which keeps printing and comparing self-referencing structs finite.
const MAX_NESTING_DEPTH: usize = 16;

/// Heap storage behind a `struct` value. Fields start out null.
#[derive(Clone, Debug, Default)]
pub struct StructSpace {
    fields: Vec<Value>,
}

pub type StructRef = Rc<RefCell<StructSpace>>;

impl StructSpace {
    pub fn new(field_count: usize) -> Self {
        Self {
            fields: vec![Value::Null; field_count],
        }
    }

    pub fn shared(field_count: usize) -> StructRef {
        Rc::new(RefCell::new(Self::new(field_count)))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: usize) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: usize, value: Value) -> bool {
        match self.fields.get_mut(field) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }
}

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i32),
    Float(f32),
    Char(char),
    Bool(bool),
    Str(String),
    Struct(StructRef),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Struct(_) => "struct",
        }
    }

    /// Kind label used by core dumps.
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Char(_) => "Char",
            Value::Bool(_) => "Bool",
            Value::Str(_) => "String",
            Value::Struct(_) => "Struct",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> VmResult<i32> {
        match self {
            Value::Int(value) => Ok(*value),
            other => Err(VmError::type_mismatch("int", other)),
        }
    }

    pub fn as_float(&self) -> VmResult<f32> {
        match self {
            Value::Float(value) => Ok(*value),
            other => Err(VmError::type_mismatch("float", other)),
        }
    }

    pub fn as_bool(&self) -> VmResult<bool> {
        match self {
            Value::Bool(value) => Ok(*value),
            other => Err(VmError::type_mismatch("bool", other)),
        }
    }

    /// Truth value for `brt`/`brf`: booleans, or integers where nonzero is true.
    pub fn as_condition(&self) -> VmResult<bool> {
        match self {
            Value::Bool(value) => Ok(*value),
            Value::Int(value) => Ok(*value != 0),
            other => Err(VmError::type_mismatch("bool", other)),
        }
    }

    pub fn as_struct(&self) -> VmResult<&StructRef> {
        match self {
            Value::Struct(space) => Ok(space),
            other => Err(VmError::type_mismatch("struct", other)),
        }
    }

    /// Rendering used by trace lines, where an empty slot shows as `?`.
    pub fn trace_repr(&self) -> String {
        match self {
            Value::Null => "?".to_string(),
            other => other.to_string(),
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:?}"),
            Value::Char(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Str(value) => f.write_str(value),
            Value::Struct(space) => {
                if depth >= MAX_NESTING_DEPTH {
                    return f.write_str("{...}");
                }
                let space = space.borrow();
                f.write_str("{")?;
                for (idx, field) in space.fields().iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    field.render(f, depth + 1)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

impl Value {
    fn equals(&self, other: &Self, depth: usize) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(lhs), Value::Int(rhs)) => lhs == rhs,
            (Value::Float(lhs), Value::Float(rhs)) => lhs == rhs,
            (Value::Char(lhs), Value::Char(rhs)) => lhs == rhs,
            (Value::Bool(lhs), Value::Bool(rhs)) => lhs == rhs,
            (Value::Str(lhs), Value::Str(rhs)) => lhs == rhs,
            (Value::Struct(lhs), Value::Struct(rhs)) => {
                if Rc::ptr_eq(lhs, rhs) {
                    return true;
                }
                if depth >= MAX_NESTING_DEPTH {
                    return false;
                }
                let (lhs, rhs) = (lhs.borrow(), rhs.borrow());
                lhs.len() == rhs.len()
                    && lhs
                        .fields()
                        .iter()
                        .zip(rhs.fields())
                        .all(|(a, b)| a.equals(b, depth + 1))
            }
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_structs_and_floats() {
        let space = StructSpace::shared(2);
        space.borrow_mut().set(0, Value::Float(5.0));
        let value = Value::Struct(space);
        assert_eq!(value.to_string(), "{5.0, null}");
    }

    #[test]
    fn self_referencing_struct_renders_finitely() {
        let space = StructSpace::shared(1);
        space
            .borrow_mut()
            .set(0, Value::Struct(Rc::clone(&space)));
        let rendered = Value::Struct(space).to_string();
        let expected = format!(
            "{}{{...}}{}",
            "{".repeat(MAX_NESTING_DEPTH),
            "}".repeat(MAX_NESTING_DEPTH)
        );
        assert_eq!(rendered, expected);
    }

    #[test]
    fn accessors_report_found_kind() {
        let err = Value::Char('x').as_int().expect_err("char is not an int");
        assert_eq!(
            err,
            VmError::TypeMismatch {
                expected: "int",
                found: "char"
            }
        );
    }

    fn self_loop() -> Value {
        let space = StructSpace::shared(1);
        space
            .borrow_mut()
            .set(0, Value::Struct(Rc::clone(&space)));
        Value::Struct(space)
    }

    #[test]
    fn distinct_cyclic_structs_compare_without_recursing_forever() {
        let (a, b) = (self_loop(), self_loop());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn acyclic_structs_compare_by_fields() {
        let make = |value: i32| {
            let space = StructSpace::shared(2);
            space.borrow_mut().set(1, Value::Int(value));
            Value::Struct(space)
        };
        assert_eq!(make(3), make(3));
        assert_ne!(make(3), make(4));
        assert_ne!(make(3), Value::Struct(StructSpace::shared(1)));
    }

    #[test]
    fn conditions_accept_bools_and_ints() {
        assert_eq!(Value::Bool(true).as_condition(), Ok(true));
        assert_eq!(Value::Int(0).as_condition(), Ok(false));
        assert_eq!(Value::Int(-3).as_condition(), Ok(true));
        assert!(Value::Null.as_condition().is_err());
    }
}
