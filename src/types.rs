/* Descriptor types shared by both IRs. Class names are kept in JVM internal form
   (java/lang/Object); descriptors in JNI form (Ljava/lang/Object;). */

use crate::error::IrError;
use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::{char, one_of};
use nom::combinator::{all_consuming, map};
use nom::multi::many0;
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse value category tracked on the operand stack.
///
/// Booleans, bytes, chars and shorts all collapse to `Int`; arrays and objects to
/// `Reference`. `Long` and `Double` occupy two JVM stack slots but are a single entry
/// here, which is what the category-aware shuffles (`dup2`, `pop2`, ...) look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JvmType {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl JvmType {
    /// True for the two-slot categories.
    pub fn is_wide(self) -> bool {
        matches!(self, JvmType::Long | JvmType::Double)
    }

    /// Mnemonic prefix used by the typed JVM opcodes (`iload`, `lstore`, `areturn`).
    pub fn prefix(self) -> char {
        match self {
            JvmType::Int => 'i',
            JvmType::Long => 'l',
            JvmType::Float => 'f',
            JvmType::Double => 'd',
            JvmType::Reference => 'a',
        }
    }
}

impl fmt::Display for JvmType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            JvmType::Int => "INT",
            JvmType::Long => "LONG",
            JvmType::Float => "FLOAT",
            JvmType::Double => "DOUBLE",
            JvmType::Reference => "REFERENCE",
        };
        f.write_str(s)
    }
}

/// Represents a Java type: array, object or primitive type
///
/// # Examples
///
/// ```
///  use jvm_ir::types::{JvmType, TypeSignature};
///
///  let t = TypeSignature::from_jni("[Ljava/lang/String;").unwrap();
///  assert_eq!(t.to_jni(), "[Ljava/lang/String;");
///  assert_eq!(t.jvm_type(), Some(JvmType::Reference));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeSignature {
    Array(Box<TypeSignature>),
    Object(String),
    Int,
    Bool,
    Byte,
    Char,
    Short,
    Long,
    Float,
    Double,
    Void,
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_jni())
    }
}

impl TypeSignature {
    pub fn from_jni(s: &str) -> Result<TypeSignature, IrError> {
        all_consuming(parse_typesignature)(s)
            .map(|(_, t)| t)
            .map_err(|_| err!(Malformed, "invalid type descriptor {}", s))
    }

    pub fn object(class_name: &str) -> TypeSignature {
        TypeSignature::Object(class_name.to_string())
    }

    pub fn to_jni(&self) -> String {
        match self {
            TypeSignature::Array(a) => "[".to_string() + &a.to_jni(),
            TypeSignature::Object(o) => format!("L{};", o),
            TypeSignature::Bool => "Z".to_string(),
            TypeSignature::Byte => "B".to_string(),
            TypeSignature::Char => "C".to_string(),
            TypeSignature::Short => "S".to_string(),
            TypeSignature::Int => "I".to_string(),
            TypeSignature::Long => "J".to_string(),
            TypeSignature::Float => "F".to_string(),
            TypeSignature::Double => "D".to_string(),
            TypeSignature::Void => "V".to_string(),
        }
    }

    pub fn to_java(&self) -> String {
        match self {
            TypeSignature::Array(a) => format!("{}[]", a.to_java()),
            TypeSignature::Object(o) => o.replace('/', "."),
            TypeSignature::Bool => "boolean".to_string(),
            TypeSignature::Byte => "byte".to_string(),
            TypeSignature::Char => "char".to_string(),
            TypeSignature::Short => "short".to_string(),
            TypeSignature::Int => "int".to_string(),
            TypeSignature::Long => "long".to_string(),
            TypeSignature::Float => "float".to_string(),
            TypeSignature::Double => "double".to_string(),
            TypeSignature::Void => "void".to_string(),
        }
    }

    /// Stack category of a value of this type, `None` for `void`.
    pub fn jvm_type(&self) -> Option<JvmType> {
        match self {
            TypeSignature::Array(_) | TypeSignature::Object(_) => Some(JvmType::Reference),
            TypeSignature::Int
            | TypeSignature::Bool
            | TypeSignature::Byte
            | TypeSignature::Char
            | TypeSignature::Short => Some(JvmType::Int),
            TypeSignature::Long => Some(JvmType::Long),
            TypeSignature::Float => Some(JvmType::Float),
            TypeSignature::Double => Some(JvmType::Double),
            TypeSignature::Void => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            TypeSignature::Array(_) | TypeSignature::Object(_) | TypeSignature::Void
        )
    }
}

/// Represents a Java method signature consisting of arguments and a return type
///
/// # Examples
///
/// ```
///  use jvm_ir::types::{MethodSignature, TypeSignature};
///
///  let m = MethodSignature::from_jni("([IJ)V").unwrap();
///  assert_eq!(m.args.len(), 2);
///  assert_eq!(m.result, TypeSignature::Void);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub args: Vec<TypeSignature>,
    pub result: TypeSignature,
}

impl MethodSignature {
    pub fn from_jni(s: &str) -> Result<MethodSignature, IrError> {
        all_consuming(parse_methodsignature)(s)
            .map(|(_, m)| m)
            .map_err(|_| err!(Malformed, "invalid method descriptor {}", s))
    }

    pub fn to_jni(&self) -> String {
        let mut s = String::from("(");
        for t in &self.args {
            s.push_str(&t.to_jni());
        }
        s.push(')');
        s.push_str(&self.result.to_jni());
        s
    }
}

pub(crate) fn parse_typesignature(input: &str) -> IResult<&str, TypeSignature> {
    alt((
        map(preceded(char('['), parse_typesignature), |t| {
            TypeSignature::Array(Box::new(t))
        }),
        map(
            delimited(char('L'), take_while1(|c| c != ';'), char(';')),
            |name: &str| TypeSignature::Object(name.to_string()),
        ),
        map(one_of("ZBCSIJFDV"), |c| match c {
            'Z' => TypeSignature::Bool,
            'B' => TypeSignature::Byte,
            'C' => TypeSignature::Char,
            'S' => TypeSignature::Short,
            'I' => TypeSignature::Int,
            'J' => TypeSignature::Long,
            'F' => TypeSignature::Float,
            'D' => TypeSignature::Double,
            _ => TypeSignature::Void,
        }),
    ))(input)
}

pub(crate) fn parse_methodsignature(input: &str) -> IResult<&str, MethodSignature> {
    map(
        pair(
            delimited(char('('), many0(parse_typesignature), char(')')),
            parse_typesignature,
        ),
        |(args, result)| MethodSignature { args, result },
    )(input)
}

/// A symbolic reference to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    /// The owning class in internal form, e.g. "com/example/MyClass".
    pub class: String,
    pub name: String,
    /// The field descriptor (type), e.g. "I" for int.
    pub descriptor: String,
}

impl FieldRef {
    pub fn new(class: &str, name: &str, descriptor: &str) -> Self {
        FieldRef {
            class: class.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    pub fn field_type(&self) -> Result<TypeSignature, IrError> {
        TypeSignature::from_jni(&self.descriptor)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Example: com/example/MyClass.myField:I
        write!(f, "{}.{}:{}", self.class, self.name, self.descriptor)
    }
}

/// A symbolic reference to a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    /// The owning class in internal form, e.g. "java/lang/Object".
    pub class: String,
    pub name: String,
    /// The method descriptor, e.g. "(I)V".
    pub descriptor: String,
}

impl MethodRef {
    pub fn new(class: &str, name: &str, descriptor: &str) -> Self {
        MethodRef {
            class: class.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    pub fn signature(&self) -> Result<MethodSignature, IrError> {
        MethodSignature::from_jni(&self.descriptor)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Example: java/lang/Object.<init>()V
        write!(f, "{}.{}{}", self.class, self.name, self.descriptor)
    }
}
