//! Field and method descriptors

use std::fmt;

use super::error::DescriptorError;
use super::opcodes;

/// A parsed field descriptor (JVMS 4.3.2)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// Internal class name, e.g. `java/lang/String`
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn parse(descriptor: &str) -> Result<FieldType, DescriptorError> {
        match Self::parse_prefix(descriptor) {
            Some((ty, "")) => Ok(ty),
            _ => Err(DescriptorError::InvalidTypeDescriptor { descriptor: descriptor.to_string() }),
        }
    }

    /// Parse one type from the front of `input`, returning the remainder
    fn parse_prefix(input: &str) -> Option<(FieldType, &str)> {
        let mut chars = input.chars();
        let ty = match chars.next()? {
            'B' => FieldType::Byte,
            'C' => FieldType::Char,
            'D' => FieldType::Double,
            'F' => FieldType::Float,
            'I' => FieldType::Int,
            'J' => FieldType::Long,
            'S' => FieldType::Short,
            'Z' => FieldType::Boolean,
            'L' => {
                let rest = &input[1..];
                let end = rest.find(';')?;
                if end == 0 {
                    return None;
                }
                return Some((FieldType::Object(rest[..end].to_string()), &rest[end + 1..]));
            }
            '[' => {
                let (inner, rest) = Self::parse_prefix(&input[1..])?;
                return Some((FieldType::Array(Box::new(inner)), rest));
            }
            _ => return None,
        };
        Some((ty, chars.as_str()))
    }

    pub fn object(internal_name: &str) -> FieldType {
        FieldType::Object(internal_name.to_string())
    }

    pub fn to_descriptor(&self) -> String {
        self.to_string()
    }

    /// Occupies two local-variable and operand-stack slots
    pub fn is_wide(&self) -> bool {
        matches!(self, FieldType::Long | FieldType::Double)
    }

    pub fn slots(&self) -> u16 {
        if self.is_wide() { 2 } else { 1 }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    pub fn load_opcode(&self) -> u8 {
        match self {
            FieldType::Long => opcodes::LLOAD,
            FieldType::Float => opcodes::FLOAD,
            FieldType::Double => opcodes::DLOAD,
            FieldType::Object(_) | FieldType::Array(_) => opcodes::ALOAD,
            _ => opcodes::ILOAD,
        }
    }

    pub fn store_opcode(&self) -> u8 {
        match self {
            FieldType::Long => opcodes::LSTORE,
            FieldType::Float => opcodes::FSTORE,
            FieldType::Double => opcodes::DSTORE,
            FieldType::Object(_) | FieldType::Array(_) => opcodes::ASTORE,
            _ => opcodes::ISTORE,
        }
    }

    pub fn return_opcode(&self) -> u8 {
        match self {
            FieldType::Long => opcodes::LRETURN,
            FieldType::Float => opcodes::FRETURN,
            FieldType::Double => opcodes::DRETURN,
            FieldType::Object(_) | FieldType::Array(_) => opcodes::ARETURN,
            _ => opcodes::IRETURN,
        }
    }

    /// Wrapper class of a primitive type
    pub fn wrapper_class(&self) -> Option<&'static str> {
        Some(match self {
            FieldType::Byte => "java/lang/Byte",
            FieldType::Char => "java/lang/Character",
            FieldType::Double => "java/lang/Double",
            FieldType::Float => "java/lang/Float",
            FieldType::Int => "java/lang/Integer",
            FieldType::Long => "java/lang/Long",
            FieldType::Short => "java/lang/Short",
            FieldType::Boolean => "java/lang/Boolean",
            FieldType::Object(_) | FieldType::Array(_) => return None,
        })
    }

    /// Operand for `ldc`/`checkcast`/`anewarray`: class name, or descriptor for arrays
    pub fn class_operand(&self) -> Option<String> {
        match self {
            FieldType::Object(name) => Some(name.clone()),
            FieldType::Array(_) => Some(self.to_descriptor()),
            _ => None,
        }
    }

    /// Name understood by `Class.forName`, e.g. `java.lang.String` or `[I`
    pub fn binary_name(&self) -> Option<String> {
        match self {
            FieldType::Object(name) => Some(name.replace('/', ".")),
            FieldType::Array(_) => Some(self.to_descriptor().replace('/', ".")),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => f.write_str("B"),
            FieldType::Char => f.write_str("C"),
            FieldType::Double => f.write_str("D"),
            FieldType::Float => f.write_str("F"),
            FieldType::Int => f.write_str("I"),
            FieldType::Long => f.write_str("J"),
            FieldType::Short => f.write_str("S"),
            FieldType::Boolean => f.write_str("Z"),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(inner) => write!(f, "[{}", inner),
        }
    }
}

/// A parsed method descriptor; `ret == None` means `void`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<MethodDescriptor, DescriptorError> {
        let invalid = || DescriptorError::InvalidMethodDescriptor { descriptor: descriptor.to_string() };
        let mut rest = descriptor.strip_prefix('(').ok_or_else(invalid)?;
        let mut params = Vec::new();
        while !rest.starts_with(')') {
            let (ty, tail) = FieldType::parse_prefix(rest).ok_or_else(invalid)?;
            params.push(ty);
            rest = tail;
        }
        let ret_str = &rest[1..];
        let ret = if ret_str == "V" {
            None
        } else {
            Some(FieldType::parse(ret_str).map_err(|_| invalid())?)
        };
        Ok(MethodDescriptor { params, ret })
    }

    /// Local-variable slots used by the arguments, excluding `this`
    pub fn arg_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slots).sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for p in &self.params {
            write!(f, "{}", p)?;
        }
        f.write_str(")")?;
        match &self.ret {
            Some(r) => write!(f, "{}", r),
            None => f.write_str("V"),
        }
    }
}

/// `Lname;` for an internal class name
pub fn object_descriptor(internal_name: &str) -> String {
    format!("L{};", internal_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_arrays_and_objects() {
        let ty = FieldType::parse("[[Ljava/lang/String;").unwrap();
        assert_eq!(
            ty,
            FieldType::Array(Box::new(FieldType::Array(Box::new(FieldType::object("java/lang/String")))))
        );
        assert_eq!(ty.to_descriptor(), "[[Ljava/lang/String;");
        assert_eq!(ty.binary_name().unwrap(), "[[Ljava.lang.String;");
    }

    #[test]
    fn rejects_garbage() {
        assert!(FieldType::parse("Q").is_err());
        assert!(FieldType::parse("L;").is_err());
        assert!(FieldType::parse("II").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
    }

    #[test]
    fn method_descriptor_counts_wide_slots() {
        let md = MethodDescriptor::parse("(JILjava/lang/Object;D)V").unwrap();
        assert_eq!(md.params.len(), 4);
        assert_eq!(md.arg_slots(), 6);
        assert_eq!(md.ret, None);
        assert_eq!(md.to_string(), "(JILjava/lang/Object;D)V");
    }
}
