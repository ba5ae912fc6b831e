//! Companion key-class generation
//!
//! A class using application identity without naming an object-id class gets one
//! generated: a public serializable class with one public field per key member, a
//! no-arg constructor, a constructor parsing the `toString` form, and value-based
//! `equals`/`hashCode`.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::codegen::defs::access_flags::*;
use crate::codegen::defs::{major_versions, CONSTRUCTOR_METHOD_NAME, JAVA_LANG_OBJECT, VOID_METHOD_DESCRIPTOR};
use crate::codegen::descriptor::FieldType;
use crate::codegen::error::BytecodeResult;
use crate::codegen::opcodes::*;
use crate::codegen::{class_file_to_bytes, ClassFile, CodeBuilder, MethodInfo};
use crate::enhance::GENERATED_KEY_SUFFIX;
use crate::error::{Error, Result};
use crate::metadata::{IdentityType, KeyConversion, MemberDescriptor, MetadataView};

const STRING: &str = "java/lang/String";
const STRING_BUILDER: &str = "java/lang/StringBuilder";
const TOKENIZER: &str = "java/util/StringTokenizer";
const DATE: &str = "java/util/Date";
const CALENDAR: &str = "java/util/Calendar";
const ENUM: &str = "java/lang/Enum";
const SERIALIZABLE: &str = "java/io/Serializable";
const SEPARATOR: &str = ":";

/// Value types built from their string form by a static factory
static FACTORIES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("java/util/UUID", "fromString"),
        ("java/util/Currency", "getInstance"),
        ("java/util/Locale", "forLanguageTag"),
        ("java/sql/Date", "valueOf"),
        ("java/sql/Time", "valueOf"),
        ("java/sql/Timestamp", "valueOf"),
    ])
});

/// JDK value types with a public `(String)` constructor
const STRING_CONSTRUCTED: [&str; 3] = ["java/math/BigDecimal", "java/math/BigInteger", "java/io/File"];

/// How one key field is parsed from, and printed to, its string form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    Primitive(FieldType),
    /// Boxed primitive; the payload is the primitive type
    Wrapper(FieldType),
    String,
    Date,
    Calendar,
    /// `Class.method(String)` returns an instance
    Factory { class: String, method: &'static str },
    /// `new Class(String)`
    StringConstructor(String),
    /// `Enum.valueOf(Class, String)`, printed with `name()`
    Enum(String),
}

impl KeyType {
    /// Strategy for a field of `field_type`, if there is one.
    ///
    /// Classes outside the built-in tables need a `conversion` from metadata.
    pub fn classify(field_type: &FieldType, conversion: Option<KeyConversion>) -> Option<KeyType> {
        let class = match field_type {
            FieldType::Array(_) => return None,
            FieldType::Object(class) => class.as_str(),
            primitive => return Some(KeyType::Primitive(primitive.clone())),
        };
        if let Some(primitive) = unbox(class) {
            return Some(KeyType::Wrapper(primitive));
        }
        Some(match class {
            STRING => KeyType::String,
            DATE => KeyType::Date,
            CALENDAR => KeyType::Calendar,
            JAVA_LANG_OBJECT => return None,
            _ => match (FACTORIES.get(class), conversion) {
                (Some(&method), _) => KeyType::Factory { class: class.to_string(), method },
                (None, Some(KeyConversion::Enum)) => KeyType::Enum(class.to_string()),
                (None, Some(KeyConversion::StringConstructor)) => KeyType::StringConstructor(class.to_string()),
                (None, None) if STRING_CONSTRUCTED.contains(&class) => KeyType::StringConstructor(class.to_string()),
                (None, None) => return None,
            },
        })
    }
}

fn unbox(class: &str) -> Option<FieldType> {
    [
        FieldType::Boolean,
        FieldType::Byte,
        FieldType::Char,
        FieldType::Short,
        FieldType::Int,
        FieldType::Long,
        FieldType::Float,
        FieldType::Double,
    ]
    .into_iter()
    .find(|p| p.wrapper_class() == Some(class))
}

/// One public field of a key class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyField {
    pub name: String,
    pub field_type: FieldType,
    pub key_type: KeyType,
}

/// Name and ordered fields of a key class to generate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyClassDescriptor {
    pub name: String,
    pub fields: Vec<KeyField>,
}

impl KeyClassDescriptor {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), fields: Vec::new() }
    }

    /// Add a field, failing when no conversion strategy covers its type
    pub fn with_field(self, name: &str, field_type: FieldType) -> Result<Self> {
        self.with_converted_field(name, field_type, None)
    }

    pub fn with_converted_field(mut self, name: &str, field_type: FieldType, conversion: Option<KeyConversion>) -> Result<Self> {
        let key_type = KeyType::classify(&field_type, conversion).ok_or_else(|| {
            Error::config_error(format!(
                "{}: no key conversion for member `{}` of type {}",
                self.name, name, field_type
            ))
        })?;
        self.fields.push(KeyField { name: name.to_string(), field_type, key_type });
        Ok(self)
    }

    /// Descriptor for the key class of `class_name`, from its primary-key members
    pub fn from_metadata(view: &dyn MetadataView, class_name: &str, key_name: &str) -> Result<Self> {
        let members: Vec<MemberDescriptor> = view.members(class_name)?.into_iter().filter(|m| m.primary_key).collect();
        if members.is_empty() {
            return Err(Error::config_error(format!("{} declares no primary-key members", class_name)));
        }
        let mut descriptor = Self::new(key_name);
        for m in members {
            // object-id classes are always constructible from their string form
            let (field_type, conversion) = match &m.field_type {
                FieldType::Object(target) if view.is_persistence_capable(target) => (
                    FieldType::object(&identity_class(view, class_name, &m, target)?),
                    Some(KeyConversion::StringConstructor),
                ),
                other => (other.clone(), m.key_conversion),
            };
            descriptor = descriptor.with_converted_field(&m.name, field_type, conversion).map_err(|_| {
                Error::config_error(format!(
                    "{}.{}: no key conversion for type {}; declare a key_conversion for it",
                    class_name,
                    m.name,
                    m.descriptor()
                ))
            })?;
        }
        Ok(descriptor)
    }
}

/// Object-id class of a persistent class referenced from a key member
fn identity_class(view: &dyn MetadataView, owner: &str, member: &MemberDescriptor, target: &str) -> Result<String> {
    let meta = view
        .class(target)
        .ok_or_else(|| Error::config_error(format!("no metadata for class `{}`", target)))?;
    match &meta.identity {
        IdentityType::Application { object_id_class: Some(id) } => Ok(id.clone()),
        IdentityType::Application { object_id_class: None } => Ok(format!("{}{}", target, GENERATED_KEY_SUFFIX)),
        _ => Err(Error::config_error(format!(
            "{}.{} refers to {}, which has no application identity",
            owner, member.name, target
        ))),
    }
}

/// Bytes of a generated class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedClass {
    /// Internal name
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Emits key classes
#[derive(Debug, Clone)]
pub struct KeyClassGenerator {
    major_version: u16,
}

impl Default for KeyClassGenerator {
    fn default() -> Self {
        Self { major_version: major_versions::JAVA_8 }
    }
}

impl KeyClassGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&self, descriptor: &KeyClassDescriptor) -> Result<GeneratedClass> {
        let name = descriptor.name.as_str();
        let mut class = ClassFile::new();
        class.major_version = self.major_version;
        class.access_flags = ACC_PUBLIC | ACC_SUPER;
        let pool_error = |e| Error::const_pool(name, e);
        class.this_class = class.constant_pool.add_class(name).map_err(pool_error)?;
        class.super_class = class.constant_pool.add_class(JAVA_LANG_OBJECT).map_err(pool_error)?;
        class.add_interface(SERIALIZABLE).map_err(pool_error)?;
        for field in &descriptor.fields {
            class
                .add_field(ACC_PUBLIC, &field.name, &field.field_type.to_descriptor())
                .map_err(pool_error)?;
        }

        let fields = &descriptor.fields;
        add_method(&mut class, name, ACC_PUBLIC, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR, |b| {
            b.aload(0)?;
            b.invokespecial(JAVA_LANG_OBJECT, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR)?;
            b.emitop(RETURN)
        })?;
        add_method(&mut class, name, ACC_PUBLIC, CONSTRUCTOR_METHOD_NAME, "(Ljava/lang/String;)V", |b| {
            parsing_constructor(b, name, fields)
        })?;
        add_method(&mut class, name, ACC_PUBLIC, "toString", "()Ljava/lang/String;", |b| to_string(b, name, fields))?;
        add_method(&mut class, name, ACC_PUBLIC, "equals", "(Ljava/lang/Object;)Z", |b| equals(b, name, fields))?;
        add_method(&mut class, name, ACC_PUBLIC, "hashCode", "()I", |b| hash_code(b, name, fields))?;

        crate::verify::verify(&class).map_err(|e| Error::internal(format!("generated {} is invalid: {}", name, e)))?;
        tracing::info!(class = %name, fields = fields.len(), "generated key class");
        Ok(GeneratedClass { name: name.to_string(), bytes: class_file_to_bytes(&class) })
    }
}

fn add_method<F>(class: &mut ClassFile, this: &str, access: u16, name: &str, descriptor: &str, body: F) -> Result<()>
where
    F: FnOnce(&mut CodeBuilder<'_>) -> BytecodeResult<()>,
{
    let pool = &mut class.constant_pool;
    let code = {
        let mut b =
            CodeBuilder::for_method(pool, this, true, access, name, descriptor).map_err(|e| Error::from_bytecode(this, name, e))?;
        body(&mut b).map_err(|e| Error::from_bytecode(this, name, e))?;
        b.into_code().map_err(|e| Error::from_bytecode(this, name, e))?
    };
    let name_index = pool.add_utf8(name).map_err(|e| Error::const_pool(this, e))?;
    let descriptor_index = pool.add_utf8(descriptor).map_err(|e| Error::const_pool(this, e))?;
    let mut method = MethodInfo::new(access, name_index, descriptor_index);
    method.set_code(pool, code).map_err(|e| Error::const_pool(this, e))?;
    class.methods.push(method);
    Ok(())
}

/// `this.f = parse(tokens.nextToken())` for every field
fn parsing_constructor(b: &mut CodeBuilder<'_>, this: &str, fields: &[KeyField]) -> BytecodeResult<()> {
    let tokenizer = FieldType::object(TOKENIZER);
    b.aload(0)?;
    b.invokespecial(JAVA_LANG_OBJECT, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR)?;
    b.new_object(TOKENIZER)?;
    b.emitop(DUP)?;
    b.aload(1)?;
    b.ldc_string(SEPARATOR)?;
    b.invokespecial(TOKENIZER, CONSTRUCTOR_METHOD_NAME, "(Ljava/lang/String;Ljava/lang/String;)V")?;
    b.store(&tokenizer, 2)?;
    for field in fields {
        b.aload(0)?;
        parse_value(b, &field.key_type, 2)?;
        b.putfield(this, &field.name, &field.field_type.to_descriptor())?;
    }
    b.emitop(RETURN)
}

/// Push the next token of the tokenizer in local `tokens`
fn next_token(b: &mut CodeBuilder<'_>, tokens: u16) -> BytecodeResult<()> {
    b.load(&FieldType::object(TOKENIZER), tokens)?;
    b.invokevirtual(TOKENIZER, "nextToken", "()Ljava/lang/String;")
}

/// Push the next token converted to `key_type`
fn parse_value(b: &mut CodeBuilder<'_>, key_type: &KeyType, tokens: u16) -> BytecodeResult<()> {
    match key_type {
        KeyType::Primitive(FieldType::Char) => first_char(b, tokens),
        KeyType::Primitive(FieldType::Boolean) => {
            next_token(b, tokens)?;
            b.invokestatic("java/lang/Boolean", "valueOf", "(Ljava/lang/String;)Ljava/lang/Boolean;")?;
            b.invokevirtual("java/lang/Boolean", "booleanValue", "()Z")
        }
        KeyType::Primitive(primitive) => {
            next_token(b, tokens)?;
            let (wrapper, method) = parse_method(primitive);
            b.invokestatic(wrapper, method, &format!("(Ljava/lang/String;){}", primitive))
        }
        KeyType::Wrapper(FieldType::Char) => {
            first_char(b, tokens)?;
            b.invokestatic("java/lang/Character", "valueOf", "(C)Ljava/lang/Character;")
        }
        KeyType::Wrapper(primitive) => {
            let wrapper = primitive.wrapper_class().unwrap_or(JAVA_LANG_OBJECT);
            next_token(b, tokens)?;
            b.invokestatic(wrapper, "valueOf", &format!("(Ljava/lang/String;)L{};", wrapper))
        }
        KeyType::String => next_token(b, tokens),
        KeyType::Date => {
            b.new_object(DATE)?;
            b.emitop(DUP)?;
            next_token(b, tokens)?;
            b.invokestatic("java/lang/Long", "parseLong", "(Ljava/lang/String;)J")?;
            b.invokespecial(DATE, CONSTRUCTOR_METHOD_NAME, "(J)V")
        }
        KeyType::Calendar => {
            b.invokestatic(CALENDAR, "getInstance", "()Ljava/util/Calendar;")?;
            b.emitop(DUP)?;
            next_token(b, tokens)?;
            b.invokestatic("java/lang/Long", "parseLong", "(Ljava/lang/String;)J")?;
            b.invokevirtual(CALENDAR, "setTimeInMillis", "(J)V")
        }
        KeyType::Factory { class, method } => {
            next_token(b, tokens)?;
            b.invokestatic(class, method, &format!("(Ljava/lang/String;)L{};", class))
        }
        KeyType::StringConstructor(class) => {
            b.new_object(class)?;
            b.emitop(DUP)?;
            next_token(b, tokens)?;
            b.invokespecial(class, CONSTRUCTOR_METHOD_NAME, "(Ljava/lang/String;)V")
        }
        KeyType::Enum(class) => {
            b.ldc_class(class)?;
            next_token(b, tokens)?;
            b.invokestatic(ENUM, "valueOf", "(Ljava/lang/Class;Ljava/lang/String;)Ljava/lang/Enum;")?;
            b.checkcast(class)
        }
    }
}

fn first_char(b: &mut CodeBuilder<'_>, tokens: u16) -> BytecodeResult<()> {
    next_token(b, tokens)?;
    b.iconst(0)?;
    b.invokevirtual(STRING, "charAt", "(I)C")
}

fn parse_method(primitive: &FieldType) -> (&'static str, &'static str) {
    match primitive {
        FieldType::Byte => ("java/lang/Byte", "parseByte"),
        FieldType::Short => ("java/lang/Short", "parseShort"),
        FieldType::Long => ("java/lang/Long", "parseLong"),
        FieldType::Float => ("java/lang/Float", "parseFloat"),
        FieldType::Double => ("java/lang/Double", "parseDouble"),
        _ => ("java/lang/Integer", "parseInt"),
    }
}

/// Fields joined with the separator; the output parses back through the string constructor
fn to_string(b: &mut CodeBuilder<'_>, this: &str, fields: &[KeyField]) -> BytecodeResult<()> {
    b.new_object(STRING_BUILDER)?;
    b.emitop(DUP)?;
    b.invokespecial(STRING_BUILDER, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR)?;
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            b.ldc_string(SEPARATOR)?;
            b.invokevirtual(STRING_BUILDER, "append", "(Ljava/lang/String;)Ljava/lang/StringBuilder;")?;
        }
        b.aload(0)?;
        b.getfield(this, &field.name, &field.field_type.to_descriptor())?;
        let argument = match (&field.key_type, &field.field_type) {
            (KeyType::Date, _) => {
                b.invokevirtual(DATE, "getTime", "()J")?;
                "J"
            }
            (KeyType::Calendar, _) => {
                b.invokevirtual(CALENDAR, "getTimeInMillis", "()J")?;
                "J"
            }
            (KeyType::Enum(_), _) => {
                b.invokevirtual(ENUM, "name", "()Ljava/lang/String;")?;
                "Ljava/lang/String;"
            }
            (_, FieldType::Boolean) => "Z",
            (_, FieldType::Char) => "C",
            (_, FieldType::Byte | FieldType::Short | FieldType::Int) => "I",
            (_, FieldType::Long) => "J",
            (_, FieldType::Float) => "F",
            (_, FieldType::Double) => "D",
            (KeyType::String, _) => "Ljava/lang/String;",
            _ => "Ljava/lang/Object;",
        };
        b.invokevirtual(STRING_BUILDER, "append", &format!("({})Ljava/lang/StringBuilder;", argument))?;
    }
    b.invokevirtual(STRING_BUILDER, "toString", "()Ljava/lang/String;")?;
    b.emitop(ARETURN)
}

fn equals(b: &mut CodeBuilder<'_>, this: &str, fields: &[KeyField]) -> BytecodeResult<()> {
    let other = FieldType::object(this);
    let not_same = b.new_label();
    let same_type = b.new_label();
    let unequal = b.new_label();

    b.aload(0)?;
    b.aload(1)?;
    b.branch(IF_ACMPNE, not_same)?;
    b.iconst(1)?;
    b.emitop(IRETURN)?;
    b.bind(not_same);
    b.aload(1)?;
    b.instanceof(this)?;
    b.branch(IFNE, same_type)?;
    b.iconst(0)?;
    b.emitop(IRETURN)?;
    b.bind(same_type);
    b.aload(1)?;
    b.checkcast(this)?;
    b.store(&other, 2)?;

    for field in fields {
        let descriptor = field.field_type.to_descriptor();
        let push = |b: &mut CodeBuilder<'_>, local: u16| -> BytecodeResult<()> {
            if local == 0 {
                b.aload(0)?;
            } else {
                b.load(&other, local)?;
            }
            b.getfield(this, &field.name, &descriptor)
        };
        if matches!(field.field_type, FieldType::Object(_) | FieldType::Array(_)) {
            // both null, or this.f.equals(other.f)
            let this_null = b.new_label();
            let next = b.new_label();
            push(b, 0)?;
            b.branch(IFNULL, this_null)?;
            push(b, 0)?;
            push(b, 2)?;
            b.invokevirtual(JAVA_LANG_OBJECT, "equals", "(Ljava/lang/Object;)Z")?;
            b.branch(IFEQ, unequal)?;
            b.branch(GOTO, next)?;
            b.bind(this_null);
            push(b, 2)?;
            b.branch(IFNONNULL, unequal)?;
            b.bind(next);
            continue;
        }
        push(b, 0)?;
        push(b, 2)?;
        match &field.field_type {
            FieldType::Long => b.emitop(LCMP)?,
            FieldType::Float => b.emitop(FCMPL)?,
            FieldType::Double => b.emitop(DCMPL)?,
            _ => {
                b.branch(IF_ICMPNE, unequal)?;
                continue;
            }
        }
        b.branch(IFNE, unequal)?;
    }
    b.iconst(1)?;
    b.emitop(IRETURN)?;
    b.bind(unequal);
    b.iconst(0)?;
    b.emitop(IRETURN)
}

/// XOR of the field hashes; a null field contributes 0
fn hash_code(b: &mut CodeBuilder<'_>, this: &str, fields: &[KeyField]) -> BytecodeResult<()> {
    b.iconst(0)?;
    for field in fields {
        let descriptor = field.field_type.to_descriptor();
        b.aload(0)?;
        b.getfield(this, &field.name, &descriptor)?;
        match &field.field_type {
            FieldType::Long => fold_long(b)?,
            FieldType::Double => {
                b.invokestatic("java/lang/Double", "doubleToLongBits", "(D)J")?;
                fold_long(b)?;
            }
            FieldType::Float => b.invokestatic("java/lang/Float", "floatToIntBits", "(F)I")?,
            FieldType::Object(_) | FieldType::Array(_) => {
                let null = b.new_label();
                let done = b.new_label();
                b.emitop(DUP)?;
                b.branch(IFNULL, null)?;
                // enum identity hashes differ between JVMs; the name does not
                if matches!(field.key_type, KeyType::Enum(_)) {
                    b.invokevirtual(ENUM, "name", "()Ljava/lang/String;")?;
                }
                b.invokevirtual(JAVA_LANG_OBJECT, "hashCode", "()I")?;
                b.branch(GOTO, done)?;
                b.bind(null);
                b.emitop(POP)?;
                b.iconst(0)?;
                b.bind(done);
            }
            _ => {}
        }
        b.emitop(IXOR)?;
    }
    b.emitop(IRETURN)
}

/// `(int) (v ^ (v >>> 32))`
fn fold_long(b: &mut CodeBuilder<'_>) -> BytecodeResult<()> {
    b.emitop(DUP2)?;
    b.iconst(32)?;
    b.emitop(LUSHR)?;
    b.emitop(LXOR)?;
    b.emitop(L2I)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::instruction::disassemble;
    use crate::metadata::{ClassMetadata, MemberMetadata, MetadataRegistry};

    #[test]
    fn classification_covers_the_documented_strategies() {
        assert_eq!(KeyType::classify(&FieldType::Int, None), Some(KeyType::Primitive(FieldType::Int)));
        assert_eq!(
            KeyType::classify(&FieldType::object("java/lang/Long"), None),
            Some(KeyType::Wrapper(FieldType::Long))
        );
        assert_eq!(
            KeyType::classify(&FieldType::object("java/util/UUID"), None),
            Some(KeyType::Factory { class: "java/util/UUID".into(), method: "fromString" })
        );
        assert_eq!(
            KeyType::classify(&FieldType::object("java/math/BigDecimal"), None),
            Some(KeyType::StringConstructor("java/math/BigDecimal".into()))
        );
        assert_eq!(KeyType::classify(&FieldType::Array(Box::new(FieldType::Byte)), None), None);
        assert_eq!(KeyType::classify(&FieldType::object(JAVA_LANG_OBJECT), None), None);
    }

    #[test]
    fn unknown_classes_need_a_declared_conversion() {
        let color = FieldType::object("e/Color");
        assert_eq!(KeyType::classify(&color, None), None);
        assert_eq!(KeyType::classify(&color, Some(KeyConversion::Enum)), Some(KeyType::Enum("e/Color".into())));
        assert_eq!(
            KeyType::classify(&color, Some(KeyConversion::StringConstructor)),
            Some(KeyType::StringConstructor("e/Color".into()))
        );
        // arrays have no string form whatever the metadata says
        assert_eq!(KeyType::classify(&FieldType::Array(Box::new(FieldType::Int)), Some(KeyConversion::Enum)), None);
    }

    #[test]
    fn enum_members_parse_with_value_of() {
        let descriptor = KeyClassDescriptor::new("e/K_PK")
            .with_field("id", FieldType::Int)
            .and_then(|d| d.with_converted_field("color", FieldType::object("e/Color"), Some(KeyConversion::Enum)))
            .unwrap();
        let generated = KeyClassGenerator::new().generate(&descriptor).unwrap();
        let class = ClassFile::parse(&generated.bytes).unwrap();
        let init = class.find_method(CONSTRUCTOR_METHOD_NAME, "(Ljava/lang/String;)V").unwrap();
        let code = init.code(&class.constant_pool).unwrap().unwrap();
        let calls: Vec<String> = crate::codegen::instruction::decode(&code.code)
            .unwrap()
            .iter()
            .filter_map(|i| class.constant_pool.member_ref(i.cp_index()?).ok())
            .map(|m| format!("{}.{}", m.owner, m.name))
            .collect();
        assert!(calls.contains(&"java/lang/Enum.valueOf".to_string()), "{:?}", calls);
        assert!(!calls.contains(&"e/Color.<init>".to_string()), "{:?}", calls);
    }

    #[test]
    fn enum_members_without_a_conversion_are_rejected() {
        let member = MemberMetadata::field("color", "Le/Color;").primary_key();
        let reg = |member: MemberMetadata| {
            MetadataRegistry::new([ClassMetadata::new("e/K").with_application_identity(None).with_member(member)])
        };
        let err = KeyClassDescriptor::from_metadata(&reg(member.clone()), "e/K", "e/K_PK").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("e/K.color"), "{}", err);

        let hinted = reg(member.with_key_conversion(KeyConversion::Enum));
        let descriptor = KeyClassDescriptor::from_metadata(&hinted, "e/K", "e/K_PK").unwrap();
        assert_eq!(descriptor.fields[0].key_type, KeyType::Enum("e/Color".into()));
    }

    #[test]
    fn unsupported_member_names_class_and_member() {
        let reg = MetadataRegistry::new([ClassMetadata::new("p/A")
            .with_application_identity(None)
            .with_member(MemberMetadata::field("blob", "[B").primary_key())]);
        let err = KeyClassDescriptor::from_metadata(&reg, "p/A", "p/A_PK").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("p/A") && message.contains("blob"), "{}", message);
    }

    #[test]
    fn references_use_the_target_identity() {
        let reg = MetadataRegistry::new([
            ClassMetadata::new("p/Owner")
                .with_application_identity(Some("p/OwnerKey"))
                .with_member(MemberMetadata::field("id", "J").primary_key()),
            ClassMetadata::new("p/Pet")
                .with_application_identity(None)
                .with_member(MemberMetadata::field("owner", "Lp/Owner;").primary_key())
                .with_member(MemberMetadata::field("name", "Ljava/lang/String;").primary_key()),
        ]);
        let descriptor = KeyClassDescriptor::from_metadata(&reg, "p/Pet", "p/Pet_PK").unwrap();
        assert_eq!(descriptor.fields[0].field_type, FieldType::object("p/OwnerKey"));
        assert_eq!(descriptor.fields[0].key_type, KeyType::StringConstructor("p/OwnerKey".into()));
        assert_eq!(descriptor.fields[1].key_type, KeyType::String);
    }

    #[test]
    fn generated_class_has_the_expected_shape() {
        let descriptor = KeyClassDescriptor::new("p/A_PK")
            .with_field("id", FieldType::Long)
            .and_then(|d| d.with_field("code", FieldType::object("java/lang/String")))
            .unwrap();
        let generated = KeyClassGenerator::new().generate(&descriptor).unwrap();
        assert_eq!(generated.name, "p/A_PK");

        let class = ClassFile::parse(&generated.bytes).unwrap();
        assert!(class.implements(SERIALIZABLE));
        assert!(class.has_field("id", "J"));
        assert!(class.has_field("code", "Ljava/lang/String;"));
        for (name, desc) in [
            ("<init>", "()V"),
            ("<init>", "(Ljava/lang/String;)V"),
            ("toString", "()Ljava/lang/String;"),
            ("equals", "(Ljava/lang/Object;)Z"),
            ("hashCode", "()I"),
        ] {
            assert!(class.has_method(name, desc), "missing {}{}", name, desc);
        }
        let init = class.find_method("<init>", "(Ljava/lang/String;)V").unwrap();
        let code = init.code(&class.constant_pool).unwrap().unwrap();
        let listing = disassemble(&code.code).join("\n");
        assert!(listing.contains("invokestatic"), "{}", listing);
        assert!(listing.contains("putfield"), "{}", listing);
    }
}
