// Shared fixtures for the integration tests
#![allow(dead_code)]

use classenhance::codegen::defs::access_flags::*;
use classenhance::codegen::defs::{CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR};
use classenhance::codegen::error::BytecodeResult;
use classenhance::codegen::instruction::{decode, Instruction};
use classenhance::codegen::opcodes::*;
use classenhance::codegen::{class_file_to_bytes, ClassFile, CodeAttribute, CodeBuilder, FieldType, MethodInfo};

/// Builds small class files the way a compiler would lay them out
pub struct ClassBuilder {
    class: ClassFile,
    name: String,
    super_name: String,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self::extending(name, "java/lang/Object")
    }

    pub fn extending(name: &str, super_name: &str) -> Self {
        let mut class = ClassFile::new();
        class.access_flags = ACC_PUBLIC | ACC_SUPER;
        class.this_class = class.constant_pool.add_class(name).unwrap();
        class.super_class = class.constant_pool.add_class(super_name).unwrap();
        Self { class, name: name.to_string(), super_name: super_name.to_string() }
    }

    pub fn version(mut self, major: u16) -> Self {
        self.class.major_version = major;
        self
    }

    pub fn field(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.class.add_field(access, name, descriptor).unwrap();
        self
    }

    /// Method whose body is assembled by `body`
    pub fn method<F>(mut self, access: u16, name: &str, descriptor: &str, body: F) -> Self
    where
        F: FnOnce(&mut CodeBuilder<'_>) -> BytecodeResult<()>,
    {
        let stack_map = self.class.major_version >= 50;
        let code = {
            let mut b =
                CodeBuilder::for_method(&mut self.class.constant_pool, &self.name, stack_map, access, name, descriptor)
                    .unwrap();
            body(&mut b).unwrap();
            b.into_code().unwrap()
        };
        self.raw_method(access, name, descriptor, code)
    }

    /// Method with a hand-assembled `Code` attribute
    pub fn raw_method(mut self, access: u16, name: &str, descriptor: &str, code: CodeAttribute) -> Self {
        let pool = &mut self.class.constant_pool;
        let name_index = pool.add_utf8(name).unwrap();
        let descriptor_index = pool.add_utf8(descriptor).unwrap();
        let mut method = MethodInfo::new(access, name_index, descriptor_index);
        method.set_code(pool, code).unwrap();
        self.class.methods.push(method);
        self
    }

    /// `public <init>()` calling the superclass constructor
    pub fn default_constructor(self) -> Self {
        let super_name = self.super_name.clone();
        self.method(ACC_PUBLIC, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR, |b| {
            b.aload(0)?;
            b.invokespecial(&super_name, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR)?;
            b.emitop(RETURN)
        })
    }

    /// `public <init>(T value)` assigning `field` after the super call
    pub fn assigning_constructor(self, field: &str, descriptor: &str) -> Self {
        let super_name = self.super_name.clone();
        let owner = self.name.clone();
        let field_type = FieldType::parse(descriptor).unwrap();
        self.method(ACC_PUBLIC, CONSTRUCTOR_METHOD_NAME, &format!("({})V", descriptor), |b| {
            b.aload(0)?;
            b.invokespecial(&super_name, CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR)?;
            b.aload(0)?;
            b.load(&field_type, 1)?;
            b.putfield(&owner, field, descriptor)?;
            b.emitop(RETURN)
        })
    }

    /// `public T name()` returning `owner.field`
    pub fn getter(self, name: &str, owner: &str, field: &str, descriptor: &str) -> Self {
        let owner = owner.to_string();
        let field_type = FieldType::parse(descriptor).unwrap();
        self.method(ACC_PUBLIC, name, &format!("(){}", descriptor), |b| {
            b.aload(0)?;
            b.getfield(&owner, field, descriptor)?;
            b.emitop(field_type.return_opcode())
        })
    }

    /// `public void name(T value)` storing into `owner.field`
    pub fn setter(self, name: &str, owner: &str, field: &str, descriptor: &str) -> Self {
        let owner = owner.to_string();
        let field_type = FieldType::parse(descriptor).unwrap();
        self.method(ACC_PUBLIC, name, &format!("({})V", descriptor), |b| {
            b.aload(0)?;
            b.load(&field_type, 1)?;
            b.putfield(&owner, field, descriptor)?;
            b.emitop(RETURN)
        })
    }

    pub fn class(self) -> ClassFile {
        self.class
    }

    pub fn build(self) -> Vec<u8> {
        class_file_to_bytes(&self.class)
    }
}

/// Decoded body of `name` + `descriptor`
pub fn instructions(class: &ClassFile, name: &str, descriptor: &str) -> Vec<Instruction> {
    let method = class
        .find_method(name, descriptor)
        .unwrap_or_else(|| panic!("{}{} not found", name, descriptor));
    let code = method.code(&class.constant_pool).unwrap().unwrap();
    decode(&code.code).unwrap()
}

pub fn code_of(class: &ClassFile, name: &str, descriptor: &str) -> CodeAttribute {
    class
        .find_method(name, descriptor)
        .unwrap_or_else(|| panic!("{}{} not found", name, descriptor))
        .code(&class.constant_pool)
        .unwrap()
        .unwrap()
}

/// `(opcode, owner.name)` of every member-referencing instruction in a body
pub fn member_refs(class: &ClassFile, name: &str, descriptor: &str) -> Vec<(u8, String)> {
    instructions(class, name, descriptor)
        .iter()
        .filter_map(|i| {
            let index = i.cp_index()?;
            let target = class.constant_pool.member_ref(index).ok()?;
            Some((i.opcode, format!("{}.{}", target.owner, target.name)))
        })
        .collect()
}

/// Names of every method the class declares
pub fn method_names(class: &ClassFile) -> Vec<String> {
    class
        .methods
        .iter()
        .map(|m| m.name(&class.constant_pool).unwrap().to_string())
        .collect()
}
