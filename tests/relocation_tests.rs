use classenhance::codegen::attribute::find_attribute;
use classenhance::codegen::defs::access_flags::*;
use classenhance::codegen::defs::{attribute_names, major_versions, VOID_METHOD_DESCRIPTOR};
use classenhance::codegen::frame::StackMapTable;
use classenhance::codegen::instruction::{decode, relocate, Insertion, Operands};
use classenhance::codegen::opcodes::*;
use classenhance::codegen::{ClassFile, CodeAttribute, ExceptionTableEntry};
use classenhance::metadata::{ClassMetadata, MemberMetadata, MetadataRegistry};
use classenhance::{enhance_class, EnhancerOptions};
use proptest::prelude::*;

mod common;
use common::{code_of, instructions, member_refs, ClassBuilder};

const CLINIT: &str = "<clinit>";
const REGISTER: &str = "javax/jdo/spi/JDOImplHelper.registerClass";

fn metadata(class: &str) -> MetadataRegistry {
    MetadataRegistry::new([ClassMetadata::new(class).with_member(MemberMetadata::field("x", "I"))])
}

fn enhance(bytes: &[u8], metadata: &MetadataRegistry) -> ClassFile {
    let result = enhance_class(bytes, metadata, &EnhancerOptions::default()).unwrap();
    assert!(result.changed);
    ClassFile::parse(&result.bytes).unwrap()
}

#[test]
fn registration_runs_before_every_initializer_return() {
    let bytes = ClassBuilder::new("p/Cfg")
        .field(ACC_PRIVATE, "x", "I")
        .field(ACC_STATIC, "debug", "Z")
        .field(ACC_STATIC, "level", "I")
        .default_constructor()
        .method(ACC_STATIC, CLINIT, VOID_METHOD_DESCRIPTOR, |b| {
            let skip = b.new_label();
            b.getstatic("p/Cfg", "debug", "Z")?;
            b.branch(IFEQ, skip)?;
            b.iconst(1)?;
            b.putstatic("p/Cfg", "level", "I")?;
            b.bind(skip);
            b.emitop(RETURN)
        })
        .build();
    let class = enhance(&bytes, &metadata("p/Cfg"));

    let body = instructions(&class, CLINIT, VOID_METHOD_DESCRIPTOR);
    let Operands::Branch(target) = body.iter().find(|i| i.opcode == IFEQ).unwrap().operands else {
        panic!("ifeq without a branch target");
    };
    let ret = body.iter().find(|i| i.opcode == RETURN).unwrap().offset;
    assert!(target < ret);
    assert!(body.iter().any(|i| i.offset == target), "branch lands mid-instruction");

    // the user's code is still first; registration sits between the branch target and the return
    let refs = member_refs(&class, CLINIT, VOID_METHOD_DESCRIPTOR);
    assert_eq!(refs[0], (GETSTATIC, "p/Cfg.debug".to_string()));
    assert_eq!(refs.iter().filter(|(_, t)| t == REGISTER).count(), 1);
    let register_at = body
        .iter()
        .find(|i| {
            i.cp_index()
                .and_then(|c| class.constant_pool.member_ref(c).ok())
                .is_some_and(|m| m.name == "registerClass")
        })
        .unwrap()
        .offset;
    assert!(target <= register_at && register_at < ret);

    let code = code_of(&class, CLINIT, VOID_METHOD_DESCRIPTOR);
    let frames = find_attribute(&code.attributes, &class.constant_pool, attribute_names::STACK_MAP_TABLE)
        .map(|a| StackMapTable::parse(&a.info).unwrap().absolute_offsets())
        .unwrap();
    assert_eq!(frames, vec![target]);
}

#[test]
fn exception_ranges_follow_the_relocated_code() {
    // 0: nop  1: return  2: astore_0  3: return, with [0, 2) handled at 2
    let mut code = CodeAttribute::new(1, 1, vec![NOP, RETURN, ASTORE_0, RETURN]);
    code.exception_table.push(ExceptionTableEntry::new(0, 2, 2, 0));
    let bytes = ClassBuilder::new("p/Old")
        .version(major_versions::JAVA_5_0)
        .field(ACC_PRIVATE, "x", "I")
        .default_constructor()
        .raw_method(ACC_STATIC, CLINIT, VOID_METHOD_DESCRIPTOR, code)
        .build();
    let class = enhance(&bytes, &metadata("p/Old"));

    let code = code_of(&class, CLINIT, VOID_METHOD_DESCRIPTOR);
    let body = decode(&code.code).unwrap();
    let handler = body.iter().find(|i| i.opcode == ASTORE_0).unwrap().offset;
    assert!(handler > 2);
    assert_eq!(body.iter().filter(|i| i.opcode == RETURN).count(), 2);
    assert_eq!(code.exception_table.len(), 1);
    let entry = &code.exception_table[0];
    assert_eq!((entry.start_pc, entry.end_pc, entry.handler_pc), (0, handler as u16, handler as u16));

    // pre-Java 6 bodies carry no stack map
    assert!(find_attribute(&code.attributes, &class.constant_pool, attribute_names::STACK_MAP_TABLE).is_none());
    let refs = member_refs(&class, CLINIT, VOID_METHOD_DESCRIPTOR);
    assert_eq!(refs.iter().filter(|(_, t)| t == REGISTER).count(), 2);
}

#[test]
fn write_object_pre_serializes_first() {
    let bytes = ClassBuilder::new("p/Ser")
        .field(ACC_PRIVATE, "x", "I")
        .default_constructor()
        .method(ACC_PRIVATE, "writeObject", "(Ljava/io/ObjectOutputStream;)V", |b| {
            b.aload(1)?;
            b.invokevirtual("java/io/ObjectOutputStream", "defaultWriteObject", VOID_METHOD_DESCRIPTOR)?;
            b.emitop(RETURN)
        })
        .build();
    let class = enhance(&bytes, &metadata("p/Ser"));

    let descriptor = "(Ljava/io/ObjectOutputStream;)V";
    let body = instructions(&class, "writeObject", descriptor);
    assert_eq!(body[0].opcode, ALOAD_0);
    assert_eq!(
        member_refs(&class, "writeObject", descriptor),
        vec![
            (INVOKEVIRTUAL, "p/Ser.jdoPreSerialize".to_string()),
            (INVOKEVIRTUAL, "java/io/ObjectOutputStream.defaultWriteObject".to_string()),
        ]
    );
    assert!(class.find_method("jdoPreSerialize", VOID_METHOD_DESCRIPTOR).is_some());
}

/// Straight-line code of `nop`s and `goto`s; each goto picks a target instruction
fn assemble(ops: &[(bool, prop::sample::Index)]) -> Vec<u8> {
    let mut offsets = Vec::with_capacity(ops.len());
    let mut at = 0u32;
    for (is_goto, _) in ops {
        offsets.push(at);
        at += if *is_goto { 3 } else { 1 };
    }
    let mut code = Vec::with_capacity(at as usize);
    for (i, (is_goto, target)) in ops.iter().enumerate() {
        if *is_goto {
            let delta = offsets[target.index(ops.len())] as i32 - offsets[i] as i32;
            code.push(GOTO);
            code.extend_from_slice(&(delta as i16).to_be_bytes());
        } else {
            code.push(NOP);
        }
    }
    code
}

proptest! {
    #[test]
    fn prop_relocation_preserves_control_flow(
        ops in proptest::collection::vec((any::<bool>(), any::<prop::sample::Index>()), 1..40),
        points in proptest::collection::vec((any::<prop::sample::Index>(), 1..4usize), 0..6)
    ) {
        let code = assemble(&ops);
        let original = decode(&code).unwrap();
        let insertions: Vec<Insertion> = points
            .iter()
            .map(|(at, len)| Insertion {
                at: original[at.index(original.len())].offset,
                fragment: vec![NOP; *len],
                max_stack: 0,
            })
            .collect();
        let added: usize = insertions.iter().map(|i| i.fragment.len()).sum();

        let (relocated, map) = relocate(&original, code.len() as u32, &insertions).unwrap();
        prop_assert_eq!(relocated.len(), code.len() + added);
        prop_assert_eq!(map.new_len() as usize, relocated.len());

        let decoded = decode(&relocated).unwrap();
        for instr in &original {
            let moved = map.instruction(instr.offset).unwrap();
            let found = decoded.iter().find(|i| i.offset == moved).unwrap();
            prop_assert_eq!(found.opcode, instr.opcode);
            if let (Operands::Branch(old), Operands::Branch(new)) = (&instr.operands, &found.operands) {
                prop_assert_eq!(Some(*new), map.target(*old));
            }
        }
        // inserted code runs before the instruction it was attached to
        for ins in &insertions {
            prop_assert!(map.target(ins.at).unwrap() + ins.fragment.len() as u32 <= map.instruction(ins.at).unwrap());
        }
    }
}
