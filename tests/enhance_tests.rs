use classenhance::codegen::defs::access_flags::*;
use classenhance::codegen::defs::{CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR};
use classenhance::codegen::instruction::Operands;
use classenhance::codegen::opcodes::*;
use classenhance::codegen::ClassFile;
use classenhance::metadata::{ClassMetadata, MemberMetadata, MetadataRegistry};
use classenhance::naming::{MemberRole, TypeRole};
use classenhance::{enhance_class, validate_class, Dialect, EnhancerOptions, Error, NamingPolicy};

mod common;
use common::{instructions, member_refs, method_names, ClassBuilder};

fn person_metadata() -> MetadataRegistry {
    MetadataRegistry::new([ClassMetadata::new("p.Person")
        .with_member(MemberMetadata::field("name", "Ljava/lang/String;"))
        .with_member(MemberMetadata::field("age", "I"))])
}

fn person() -> Vec<u8> {
    ClassBuilder::new("p/Person")
        .field(ACC_PRIVATE, "name", "Ljava/lang/String;")
        .field(ACC_PRIVATE, "age", "I")
        .default_constructor()
        .assigning_constructor("age", "I")
        .getter("getAge", "p/Person", "age", "I")
        .setter("setAge", "p/Person", "age", "I")
        .getter("getName", "p/Person", "name", "Ljava/lang/String;")
        .build()
}

fn enhanced(bytes: &[u8], metadata: &MetadataRegistry, options: &EnhancerOptions) -> ClassFile {
    let result = enhance_class(bytes, metadata, options).unwrap();
    assert!(result.changed);
    ClassFile::parse(&result.bytes).unwrap()
}

#[test]
fn field_accesses_go_through_accessors() {
    let class = enhanced(&person(), &person_metadata(), &EnhancerOptions::default());

    let get_age = member_refs(&class, "getAge", "()I");
    assert!(get_age.contains(&(INVOKESTATIC, "p/Person.jdoGetage".to_string())), "{:?}", get_age);
    assert!(!get_age.iter().any(|(op, _)| *op == GETFIELD));

    let set_age = member_refs(&class, "setAge", "(I)V");
    assert!(set_age.contains(&(INVOKESTATIC, "p/Person.jdoSetage".to_string())), "{:?}", set_age);
    assert!(!set_age.iter().any(|(op, _)| *op == PUTFIELD));

    let get_name = member_refs(&class, "getName", "()Ljava/lang/String;");
    assert!(get_name.contains(&(INVOKESTATIC, "p/Person.jdoGetname".to_string())));
}

#[test]
fn constructors_keep_direct_writes() {
    let class = enhanced(&person(), &person_metadata(), &EnhancerOptions::default());
    let init = member_refs(&class, CONSTRUCTOR_METHOD_NAME, "(I)V");
    assert!(init.contains(&(PUTFIELD, "p/Person.age".to_string())), "{:?}", init);
    assert!(!init.iter().any(|(op, target)| *op == INVOKESTATIC && target.contains("jdoSet")));
}

#[test]
fn accessors_copy_field_visibility() {
    let class = enhanced(&person(), &person_metadata(), &EnhancerOptions::default());
    let getter = class.find_method("jdoGetage", "(Lp/Person;)I").unwrap();
    assert_eq!(getter.access_flags, ACC_PRIVATE | ACC_STATIC | ACC_FINAL);
    let raw = class.find_method("jdoRawGetage", "(Lp/Person;)I").unwrap();
    assert_eq!(raw.access_flags, ACC_PRIVATE | ACC_STATIC);

    let raw_refs = member_refs(&class, "jdoRawGetage", "(Lp/Person;)I");
    assert_eq!(raw_refs, vec![(GETFIELD, "p/Person.age".to_string())]);
}

#[test]
fn contract_members_are_added() {
    let policy = NamingPolicy::jdo();
    let class = enhanced(&person(), &person_metadata(), &EnhancerOptions::default());
    assert!(class.implements(policy.type_name(TypeRole::PersistenceCapable)));
    for role in [MemberRole::StateManagerField, MemberRole::FlagsField, MemberRole::InheritedFieldCountField] {
        let spec = policy.member(role);
        assert!(class.has_field(&spec.name, &spec.descriptor), "missing {}", spec.name);
    }
    for role in [MemberRole::ProvideField, MemberRole::ReplaceField, MemberRole::NewInstance, MemberRole::IsDirty] {
        let spec = policy.member(role);
        assert!(class.has_method(&spec.name, &spec.descriptor), "missing {}", spec.name);
    }
    // registration lives in the added static initializer
    let clinit = member_refs(&class, "<clinit>", VOID_METHOD_DESCRIPTOR);
    assert!(clinit.contains(&(INVOKESTATIC, "javax/jdo/spi/JDOImplHelper.registerClass".to_string())));
}

#[test]
fn second_enhancement_changes_nothing() {
    let metadata = person_metadata();
    let options = EnhancerOptions::default();
    let first = enhance_class(&person(), &metadata, &options).unwrap();
    let second = enhance_class(&first.bytes, &metadata, &options).unwrap();
    assert!(!second.changed);
    assert_eq!(second.bytes, first.bytes);
}

#[test]
fn enhanced_class_validates_clean() {
    let metadata = person_metadata();
    let result = enhance_class(&person(), &metadata, &EnhancerOptions::default()).unwrap();
    let report = validate_class(&result.bytes, &metadata, Dialect::Jdo);
    assert!(report.is_enhanced(), "{:?}", report.messages());
    assert!(report.diagnostics.is_empty());

    let before = validate_class(&person(), &metadata, Dialect::Jdo);
    assert!(!before.is_enhanced());
}

#[test]
fn validator_names_a_removed_method() {
    let metadata = person_metadata();
    let result = enhance_class(&person(), &metadata, &EnhancerOptions::default()).unwrap();
    let mut class = ClassFile::parse(&result.bytes).unwrap();
    let index = class.find_method_index("jdoMakeDirty", "(Ljava/lang/String;)V").unwrap();
    class.methods.remove(index);
    let bytes = classenhance::codegen::class_file_to_bytes(&class);

    let report = validate_class(&bytes, &metadata, Dialect::Jdo);
    assert!(!report.is_enhanced());
    assert_eq!(report.diagnostics.len(), 1, "{:?}", report.messages());
    assert!(report.messages()[0].contains("jdoMakeDirty"));
}

#[test]
fn dialect_selects_the_names() {
    let metadata = person_metadata();
    let options = EnhancerOptions { dialect: Dialect::Datanucleus, ..EnhancerOptions::default() };
    let class = enhanced(&person(), &metadata, &options);

    assert!(class.implements("org/datanucleus/enhancement/Persistable"));
    assert!(!class.implements("javax/jdo/spi/PersistenceCapable"));
    assert!(class.find_field("dnStateManager").is_some());
    assert!(class.find_field("jdoStateManager").is_none());
    let names = method_names(&class);
    assert!(names.iter().any(|n| n == "dnGetage"));
    assert!(!names.iter().any(|n| n.starts_with("jdo")), "{:?}", names);

    let bytes = classenhance::codegen::class_file_to_bytes(&class);
    assert!(validate_class(&bytes, &metadata, Dialect::Datanucleus).is_enhanced());
    assert!(!validate_class(&bytes, &metadata, Dialect::Jdo).is_enhanced());
}

#[test]
fn default_constructor_is_added_on_request() {
    let metadata = MetadataRegistry::new([ClassMetadata::new("p/Only").with_member(MemberMetadata::field("x", "J"))]);
    let bytes = ClassBuilder::new("p/Only")
        .field(ACC_PRIVATE, "x", "J")
        .assigning_constructor("x", "J")
        .build();

    let class = enhanced(&bytes, &metadata, &EnhancerOptions::default());
    assert!(class.has_method(CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR));

    let options = EnhancerOptions { add_default_constructor: false, ..EnhancerOptions::default() };
    let class = enhanced(&bytes, &metadata, &options);
    assert!(!class.has_method(CONSTRUCTOR_METHOD_NAME, VOID_METHOD_DESCRIPTOR));
    // without a constructor, newInstance can only throw
    let body = instructions(&class, "jdoNewInstance", "(Ljavax/jdo/spi/StateManager;)Ljavax/jdo/spi/PersistenceCapable;");
    assert_eq!(body.last().unwrap().opcode, ATHROW);
}

#[test]
fn metadata_naming_an_absent_field_fails() {
    let metadata = MetadataRegistry::new([ClassMetadata::new("p/Person").with_member(MemberMetadata::field("ghost", "I"))]);
    let err = enhance_class(&person(), &metadata, &EnhancerOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MissingMember { ref member, .. } if member == "ghost"), "{}", err);
}

#[test]
fn persistence_aware_classes_only_get_rewritten() {
    let metadata = MetadataRegistry::new([
        ClassMetadata::new("p/Person").with_member(MemberMetadata::field("age", "I")),
        ClassMetadata::aware("p/Client"),
    ]);
    let client = ClassBuilder::new("p/Client")
        .default_constructor()
        .method(ACC_PUBLIC | ACC_STATIC, "peek", "(Lp/Person;)I", |b| {
            b.aload(0)?;
            b.getfield("p/Person", "age", "I")?;
            b.emitop(IRETURN)
        })
        .build();

    let before = validate_class(&client, &metadata, Dialect::Jdo);
    assert!(before.messages().iter().any(|m| m.contains("p/Person.age")), "{:?}", before.messages());

    let result = enhance_class(&client, &metadata, &EnhancerOptions::default()).unwrap();
    assert!(result.changed);
    let class = ClassFile::parse(&result.bytes).unwrap();
    assert_eq!(
        member_refs(&class, "peek", "(Lp/Person;)I"),
        vec![(INVOKESTATIC, "p/Person.jdoGetage".to_string())]
    );
    assert!(class.interfaces.is_empty());
    assert_eq!(class.fields.len(), 0);
    assert!(validate_class(&result.bytes, &metadata, Dialect::Jdo).is_enhanced());

    let again = enhance_class(&result.bytes, &metadata, &EnhancerOptions::default()).unwrap();
    assert!(!again.changed);
}

#[test]
fn property_bodies_move_to_raw_accessors() {
    let metadata = MetadataRegistry::new([
        ClassMetadata::new("p/Bean").with_member(MemberMetadata::property("title", "Ljava/lang/String;"))
    ]);
    let bytes = ClassBuilder::new("p/Bean")
        .field(ACC_PRIVATE, "t", "Ljava/lang/String;")
        .default_constructor()
        .getter("getTitle", "p/Bean", "t", "Ljava/lang/String;")
        .setter("setTitle", "p/Bean", "t", "Ljava/lang/String;")
        .build();

    let class = enhanced(&bytes, &metadata, &EnhancerOptions::default());
    // the original body, direct field access included, now lives under the raw name
    assert_eq!(
        member_refs(&class, "jdoRawGetTitle", "()Ljava/lang/String;"),
        vec![(GETFIELD, "p/Bean.t".to_string())]
    );
    let getter = member_refs(&class, "getTitle", "()Ljava/lang/String;");
    assert!(getter.contains(&(INVOKESPECIAL, "p/Bean.jdoRawGetTitle".to_string())), "{:?}", getter);
    assert!(getter.iter().any(|(op, t)| *op == INVOKEINTERFACE && t.ends_with(".getStringField")));

    let report = validate_class(&classenhance::codegen::class_file_to_bytes(&class), &metadata, Dialect::Jdo);
    assert!(report.is_enhanced(), "{:?}", report.messages());
}

#[test]
fn provide_field_dispatches_on_relative_index() {
    let class = enhanced(&person(), &person_metadata(), &EnhancerOptions::default());
    let body = instructions(&class, "jdoProvideField", "(I)V");
    let switch = body.iter().find(|i| i.opcode == TABLESWITCH).expect("tableswitch");
    match &switch.operands {
        Operands::TableSwitch { low, targets, .. } => {
            assert_eq!(*low, 0);
            assert_eq!(targets.len(), 2);
        }
        other => panic!("unexpected operands {:?}", other),
    }
    // root classes reject unknown indices instead of delegating
    assert!(!body.iter().any(|i| i.opcode == INVOKESPECIAL
        && class.constant_pool.member_ref(i.cp_index().unwrap()).map(|m| m.name == "jdoProvideField").unwrap_or(false)));
}

#[test]
fn read_policy_decides_how_the_state_manager_is_consulted() {
    use classenhance::metadata::AccessPolicy;
    let member = |name: &str, policy| MemberMetadata::field(name, "I").with_policies(policy, policy);
    let metadata = MetadataRegistry::new([ClassMetadata::new("p.Acct")
        .with_member(member("plain", AccessPolicy::Normal))
        .with_member(member("checked", AccessPolicy::Checked))
        .with_member(member("mediated", AccessPolicy::Mediated))]);
    let bytes = ClassBuilder::new("p/Acct")
        .field(ACC_PRIVATE, "plain", "I")
        .field(ACC_PRIVATE, "checked", "I")
        .field(ACC_PRIVATE, "mediated", "I")
        .default_constructor()
        .build();
    let class = enhanced(&bytes, &metadata, &EnhancerOptions::default());
    let refs = |field: &str| member_refs(&class, &format!("jdoGet{}", field), "(Lp/Acct;)I");
    let flags = (GETFIELD, "p/Acct.jdoFlags".to_string());
    let state_manager = (GETFIELD, "p/Acct.jdoStateManager".to_string());

    assert_eq!(refs("plain"), vec![(INVOKESTATIC, "p/Acct.jdoRawGetplain".to_string())]);

    let checked = refs("checked");
    assert_eq!(checked[0], flags);
    assert_eq!(checked[1], state_manager);

    let mediated = refs("mediated");
    assert_eq!(mediated[0], state_manager);
    assert!(!mediated.contains(&flags));
    assert!(mediated.contains(&(INVOKEINTERFACE, "javax/jdo/spi/StateManager.isLoaded".to_string())));
}

fn account(detachable: bool) -> (Vec<u8>, MetadataRegistry) {
    use classenhance::metadata::AccessPolicy;
    let member = |name: &str, policy| MemberMetadata::field(name, "I").with_policies(policy, policy);
    let mut meta = ClassMetadata::new("p.Ledger")
        .with_member(member("plain", AccessPolicy::Normal))
        .with_member(member("checked", AccessPolicy::Checked))
        .with_member(member("mediated", AccessPolicy::Mediated));
    if detachable {
        meta = meta.detachable();
    }
    let bytes = ClassBuilder::new("p/Ledger")
        .field(ACC_PRIVATE, "plain", "I")
        .field(ACC_PRIVATE, "checked", "I")
        .field(ACC_PRIVATE, "mediated", "I")
        .default_constructor()
        .build();
    (bytes, MetadataRegistry::new([meta]))
}

#[test]
fn write_policy_decides_how_the_state_manager_is_consulted() {
    let (bytes, metadata) = account(false);
    let class = enhanced(&bytes, &metadata, &EnhancerOptions::default());
    let refs = |field: &str| member_refs(&class, &format!("jdoSet{}", field), "(Lp/Ledger;I)V");
    let flags = (GETFIELD, "p/Ledger.jdoFlags".to_string());
    let state_manager = (GETFIELD, "p/Ledger.jdoStateManager".to_string());
    let set_field = (INVOKEINTERFACE, "javax/jdo/spi/StateManager.setIntField".to_string());

    assert_eq!(refs("plain"), vec![(INVOKESTATIC, "p/Ledger.jdoRawSetplain".to_string())]);

    let checked = refs("checked");
    assert_eq!(&checked[..2], &[flags.clone(), state_manager.clone()]);
    assert!(checked.contains(&set_field));

    let mediated = refs("mediated");
    assert_eq!(mediated[0], state_manager);
    assert!(!mediated.contains(&flags));
    assert!(mediated.contains(&set_field));
    // the raw write is the fallback when no state manager is attached
    assert_eq!(mediated.last().unwrap(), &(INVOKESTATIC, "p/Ledger.jdoRawSetmediated".to_string()));
}

#[test]
fn detached_reads_of_unloaded_fields_throw() {
    let (bytes, metadata) = account(true);
    let class = enhanced(&bytes, &metadata, &EnhancerOptions::default());
    let refs = member_refs(&class, "jdoGetchecked", "(Lp/Ledger;)I");
    assert!(refs.contains(&(INVOKEVIRTUAL, "p/Ledger.jdoIsDetached".to_string())), "{:?}", refs);
    assert!(refs.contains(&(INVOKEVIRTUAL, "java/util/BitSet.get".to_string())));
    assert!(refs.contains(&(INVOKESPECIAL, "javax/jdo/JDODetachedFieldAccessException.<init>".to_string())));
    assert!(!refs.iter().any(|(_, target)| target.ends_with("undetachedFieldAccess")));
    assert!(instructions(&class, "jdoGetchecked", "(Lp/Ledger;)I").iter().any(|i| i.opcode == ATHROW));

    // normal members are never intercepted, detached or not
    assert_eq!(
        member_refs(&class, "jdoGetplain", "(Lp/Ledger;)I"),
        vec![(INVOKESTATIC, "p/Ledger.jdoRawGetplain".to_string())]
    );
}

#[test]
fn detached_reads_notify_the_listener_when_configured() {
    let (bytes, metadata) = account(true);
    let options = EnhancerOptions { detach_listener: true, ..EnhancerOptions::default() };
    let class = enhanced(&bytes, &metadata, &options);
    let refs = member_refs(&class, "jdoGetmediated", "(Lp/Ledger;)I");
    assert!(refs.contains(&(INVOKESTATIC, "org/datanucleus/util/DetachListener.getInstance".to_string())), "{:?}", refs);
    assert!(refs.contains(&(INVOKEVIRTUAL, "org/datanucleus/util/DetachListener.undetachedFieldAccess".to_string())));
    assert!(!refs.iter().any(|(_, target)| target.starts_with("javax/jdo/JDODetachedFieldAccessException")));
}

#[test]
fn detached_writes_mark_the_field_dirty() {
    let (bytes, metadata) = account(true);
    let class = enhanced(&bytes, &metadata, &EnhancerOptions::default());
    let refs = member_refs(&class, "jdoSetchecked", "(Lp/Ledger;I)V");
    let raw = refs.iter().position(|r| r == &(INVOKESTATIC, "p/Ledger.jdoRawSetchecked".to_string())).unwrap();
    let dirty = refs.iter().position(|r| r == &(INVOKEVIRTUAL, "java/util/BitSet.set".to_string())).unwrap();
    assert!(raw < dirty, "{:?}", refs);
    assert!(refs.contains(&(GETFIELD, "p/Ledger.jdoDetachedState".to_string())));

    // a class that cannot detach keeps no dirty bits
    let (bytes, metadata) = account(false);
    let plain = enhanced(&bytes, &metadata, &EnhancerOptions::default());
    assert!(!member_refs(&plain, "jdoSetchecked", "(Lp/Ledger;I)V").iter().any(|(_, t)| t.starts_with("java/util/BitSet")));
}
