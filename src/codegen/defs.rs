//! Generic classfile-specific definitions

/// Header of Java class file (magic number)
pub const MAGIC: u32 = 0xCAFEBABE;

/// Name of a constructor
pub const CONSTRUCTOR_METHOD_NAME: &str = "<init>";

/// Name of a static initializer
pub const STATIC_INITIALIZER_METHOD_NAME: &str = "<clinit>";

/// Descriptor shared by no-arg constructors and static initializers
pub const VOID_METHOD_DESCRIPTOR: &str = "()V";

/// Root of every class hierarchy
pub const JAVA_LANG_OBJECT: &str = "java/lang/Object";

/// JVM version constants
pub mod major_versions {
    pub const JAVA_1_1: u16 = 45;
    pub const JAVA_5_0: u16 = 49;
    pub const JAVA_6_0: u16 = 50;
    pub const JAVA_7: u16 = 51;
    pub const JAVA_8: u16 = 52;
    pub const JAVA_11: u16 = 55;
    pub const JAVA_17: u16 = 61;
    pub const JAVA_21: u16 = 65;
}

pub const JAVA_1_8: u16 = major_versions::JAVA_8;

/// First class-file version whose methods carry a StackMapTable
pub const FIRST_STACK_MAP_VERSION: u16 = major_versions::JAVA_6_0;

/// First class-file version where `ldc` accepts CONSTANT_Class entries
pub const FIRST_LDC_CLASS_VERSION: u16 = major_versions::JAVA_5_0;

/// Access flags for classes, fields, and methods
pub mod access_flags {
    pub const ACC_PUBLIC: u16 = 0x0001;
    pub const ACC_PRIVATE: u16 = 0x0002;
    pub const ACC_PROTECTED: u16 = 0x0004;
    pub const ACC_STATIC: u16 = 0x0008;
    pub const ACC_FINAL: u16 = 0x0010;
    pub const ACC_SUPER: u16 = 0x0020;
    pub const ACC_SYNCHRONIZED: u16 = 0x0020;
    pub const ACC_VOLATILE: u16 = 0x0040;
    pub const ACC_BRIDGE: u16 = 0x0040;
    pub const ACC_TRANSIENT: u16 = 0x0080;
    pub const ACC_VARARGS: u16 = 0x0080;
    pub const ACC_NATIVE: u16 = 0x0100;
    pub const ACC_INTERFACE: u16 = 0x0200;
    pub const ACC_ABSTRACT: u16 = 0x0400;
    pub const ACC_STRICT: u16 = 0x0800;
    pub const ACC_SYNTHETIC: u16 = 0x1000;
    pub const ACC_ANNOTATION: u16 = 0x2000;
    pub const ACC_ENUM: u16 = 0x4000;
    pub const ACC_MODULE: u16 = 0x8000;

    /// Mask of the three visibility bits
    pub const VISIBILITY_MASK: u16 = ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED;
}

/// Well-known attribute names
pub mod attribute_names {
    pub const CODE: &str = "Code";
    pub const EXCEPTIONS: &str = "Exceptions";
    pub const CONSTANT_VALUE: &str = "ConstantValue";
    pub const BOOTSTRAP_METHODS: &str = "BootstrapMethods";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
    pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
    pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
    pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
    pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
    pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";
}
