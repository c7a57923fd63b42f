use crate::analyze::TargetKind;
use crate::instr::Opcode;
use crate::intermediate::{IntermediateMethod, IntermediateProgram};
use crate::{compile_sources, CompileError, SourceFile};

fn lower(source: &str, target: TargetKind) -> Result<IntermediateProgram, CompileError> {
    compile_sources(
        &[SourceFile {
            name: "test.opl".to_string(),
            text: source.to_string(),
        }],
        "",
        target,
        false,
    )
}

fn find_method<'a>(program: &'a IntermediateProgram, prefix: &str) -> &'a IntermediateMethod {
    program
        .classes
        .iter()
        .flat_map(|class| class.methods.iter())
        .find(|method| method.name.starts_with(prefix))
        .unwrap_or_else(|| panic!("method {} not emitted", prefix))
}

#[test]
fn test_main_stream_ends_with_rtrn() {
    let program = lower(
        "bundle System { class Base { } class String { } } \
         class Hello { function : Main(args : System.String[]) ~ Nil { } }",
        TargetKind::Executable,
    )
    .expect("lowers");

    let main = find_method(&program, "Hello:Main");
    assert_eq!(main.instructions.last().map(|i| i.op), Some(Opcode::Rtrn));

    // the entry ids point at Hello's Main
    let hello = program
        .classes
        .iter()
        .find(|class| class.name == "Hello")
        .expect("Hello emitted");
    assert_eq!(program.start_class_id, hello.id);
    assert_eq!(program.start_method_id, main.id);
    assert!(program.string_cls_id >= 0);
}

#[test]
fn test_parameters_stored_in_reverse_order() {
    let program = lower(
        "class P { method : public : M(a : Int, b : Int) ~ Nil { } }",
        TargetKind::Library,
    )
    .expect("lowers");
    let method = find_method(&program, "P:M");
    // b (slot 1) restored before a (slot 0)
    assert_eq!(method.instructions[0].op, Opcode::StorIntVar);
    assert_eq!(method.instructions[0].operand, 1);
    assert_eq!(method.instructions[1].op, Opcode::StorIntVar);
    assert_eq!(method.instructions[1].operand, 0);
    assert_eq!(method.num_params, 2);
}

#[test]
fn test_constructor_returns_instance() {
    let program = lower("class C { New() { } }", TargetKind::Library).expect("lowers");
    let ctor = find_method(&program, "C:New");
    let ops: Vec<Opcode> = ctor.instructions.iter().map(|i| i.op).collect();
    let last_two = &ops[ops.len() - 2..];
    assert_eq!(last_two, &[Opcode::LoadInstMem, Opcode::Rtrn]);
}

#[test]
fn test_select_with_three_labels_is_a_cascade() {
    let program = lower(
        "class S { method : public : Pick(x : Int) ~ Nil { \
           select (x) { label 1 : { } label 3 : { } label 5 : { } } \
         } }",
        TargetKind::Library,
    )
    .expect("lowers");
    let method = find_method(&program, "S:Pick");
    assert!(method.instructions.iter().all(|i| i.op != Opcode::LesInt));
    let equality_tests = method
        .instructions
        .iter()
        .filter(|i| i.op == Opcode::EqlInt)
        .count();
    assert_eq!(equality_tests, 3);
}

#[test]
fn test_select_with_five_labels_is_a_balanced_tree() {
    let program = lower(
        "class S { method : public : Pick(x : Int) ~ Nil { \
           select (x) { \
             label 1 : { } label 3 : { } label 5 : { } label 7 : { } label 9 : { } \
             other : { } \
           } \
         } }",
        TargetKind::Library,
    )
    .expect("lowers");
    let method = find_method(&program, "S:Pick");

    // the root tests the median value
    let first_label = method
        .instructions
        .iter()
        .position(|i| i.op == Opcode::Lbl)
        .expect("tree root label");
    assert_eq!(method.instructions[first_label + 1].op, Opcode::LoadIntLit);
    assert_eq!(method.instructions[first_label + 1].operand, 5);

    // comparison-tree splits are present
    assert!(method.instructions.iter().any(|i| i.op == Opcode::LesInt));
}

#[test]
fn test_frame_budget_boundary() {
    // exactly at the limit: 48 int slots = 192 bytes
    let mut body = String::new();
    for index in 0..48 {
        body.push_str(&format!("l{} : Int; ", index));
    }
    let at_limit = format!(
        "class F {{ method : public : M() ~ Nil {{ {} }} }}",
        body
    );
    let program = lower(&at_limit, TargetKind::Library).expect("fits the frame");
    assert_eq!(find_method(&program, "F:M").space, 192);

    // one slot past the limit is fatal
    body.push_str("overflow : Int; ");
    let past_limit = format!(
        "class F {{ method : public : M() ~ Nil {{ {} }} }}",
        body
    );
    match lower(&past_limit, TargetKind::Library) {
        Err(CompileError::Fatal(error)) => {
            assert!(error.message.contains("local space has been exceeded"));
        }
        other => panic!("expected a fatal frame error, got {:?}", other.is_ok()),
    }
}

#[test]
fn test_float_locals_take_two_slots() {
    let program = lower(
        "class F { method : public : M(x : Float, y : Int) ~ Nil { } }",
        TargetKind::Library,
    )
    .expect("lowers");
    let method = find_method(&program, "F:M");
    // x occupies slots 0-1, y slot 2
    assert_eq!(method.space, 12);
    assert_eq!(method.num_params, 2);
}

#[test]
fn test_empty_interpolated_string_boxes() {
    let program = lower(
        "use System; \
         bundle System { \
           class Base { New() { } } \
           class String from Base { New() { Parent(); } } \
         } \
         class H { method : public : M() ~ Nil { s : System.String := \"\"; } }",
        TargetKind::Library,
    )
    .expect("lowers");

    assert!(program.char_strings.iter().any(|value| value.is_empty()));
    let method = find_method(&program, "H:M");
    // library mode: the construction stays symbolic
    assert!(method
        .instructions
        .iter()
        .any(|i| i.op == Opcode::LibNewObjInst && i.operand5 == "System.String"));
}

#[test]
fn test_unused_return_is_popped() {
    let program = lower(
        "class P { \
           method : public : V() ~ Int { return 3; } \
           method : public : M() ~ Nil { V(); } \
         }",
        TargetKind::Library,
    )
    .expect("lowers");
    let method = find_method(&program, "P:M:");
    assert!(method.instructions.iter().any(|i| i.op == Opcode::PopInt));
}

#[test]
fn test_library_calls_stay_symbolic_in_library_mode() {
    let program = lower(
        "class A { method : public : M() ~ Nil { } } \
         class B { method : public : N(a : A) ~ Nil { a->M(); } }",
        TargetKind::Library,
    )
    .expect("lowers");
    let method = find_method(&program, "B:N");
    let call = method
        .instructions
        .iter()
        .find(|i| i.op == Opcode::LibMthdCall)
        .expect("symbolic call");
    assert_eq!(call.operand5, "A");
    assert_eq!(call.operand6, "A:M:");
}

#[test]
fn test_and_or_reserves_flag_slot() {
    let program = lower(
        "class L { method : public : M(a : Bool, b : Bool) ~ Bool { return a & b; } }",
        TargetKind::Library,
    )
    .expect("lowers");
    let method = find_method(&program, "L:M");
    assert!(method.has_and_or);
    // slot zero belongs to the flag: parameters start at slot one
    assert!(method
        .instructions
        .iter()
        .any(|i| i.op == Opcode::StorIntVar && i.operand == 1));
}

#[test]
fn test_critical_section_brackets_body() {
    let program = lower(
        "bundle System.Concurrency { class ThreadMutex { } } \
         class T { \
           mux : System.Concurrency.ThreadMutex; \
           method : public : M() ~ Nil { critical (mux) { } } \
         }",
        TargetKind::Library,
    )
    .expect("lowers");
    let method = find_method(&program, "T:M");
    let ops: Vec<Opcode> = method.instructions.iter().map(|i| i.op).collect();
    assert!(ops.contains(&Opcode::CriticalStart));
    assert!(ops.contains(&Opcode::CriticalEnd));
}
