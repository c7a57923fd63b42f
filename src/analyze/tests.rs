use super::{Analyzer, TargetKind};
use crate::ast::{ExprKind, Program};
use crate::diagnostic::Diagnostic;
use crate::lexer::Lexer;
use crate::linker::Linker;
use crate::parser::Parser;

fn analyze_source(source: &str, target: TargetKind) -> Result<Analyzer, Vec<Diagnostic>> {
    let mut program = Program::new();
    program.add_file("test.opl".to_string());
    let (tokens, lex_errors) = Lexer::new(source, 0).tokenize();
    assert!(lex_errors.is_empty(), "lex errors: {:?}", lex_errors);
    Parser::new(&mut program, tokens, "test.opl".to_string()).parse()?;

    let mut analyzer = Analyzer::new(program, Linker::new(String::new()), target);
    analyzer.analyze().expect("no fatal errors");
    if analyzer.diagnostics.is_empty() {
        Ok(analyzer)
    } else {
        Err(std::mem::take(&mut analyzer.diagnostics).into_sorted())
    }
}

fn messages(diagnostics: &[Diagnostic]) -> Vec<String> {
    diagnostics.iter().map(|d| d.message.clone()).collect()
}

#[test]
fn test_hello_world_entry_point() {
    let analyzer = analyze_source(
        "bundle System { class Base { } class String { } } \
         class Hello { function : Main(args : System.String[]) ~ Nil { } }",
        TargetKind::Executable,
    )
    .expect("analyzes");
    let (class, method) = analyzer.program.start.expect("entry point");
    assert_eq!(analyzer.program.class(class).name, "Hello");
    assert_eq!(
        analyzer.program.method(method).encoded_name,
        "Hello:Main:o.System.String*,"
    );
    // the mangling survives a decode/encode round trip
    let encoded = &analyzer.program.method(method).encoded_name;
    let params = encoded.rsplit(':').next().unwrap();
    let decoded = crate::types::decode_parameter_list(params);
    assert_eq!(crate::types::encode_parameter_list(&decoded), params);
}

#[test]
fn test_missing_main_is_an_error() {
    let errors = analyze_source("class Quiet { }", TargetKind::Executable).unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("'Main(args)' function was not defined")));
}

#[test]
fn test_library_forbids_main() {
    let errors = analyze_source(
        "bundle System { class Base { } class String { } } \
         class Hello { function : Main(args : System.String[]) ~ Nil { } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("may not define a 'Main(args)' function")));
}

#[test]
fn test_overload_selection_prefers_exact_match() {
    let analyzer = analyze_source(
        "class O { \
           method : public : F(x : Byte) ~ Nil { } \
           method : public : F(x : Int) ~ Nil { } \
           method : public : Go() ~ Nil { F(42); F(42b); } \
         }",
        TargetKind::Library,
    )
    .expect("analyzes");

    // both call sites resolved; the Int literal took F:i, the Byte literal F:b
    let mut selected = Vec::new();
    for expr in &analyzer.program.exprs {
        if let ExprKind::MethodCall(data) = &expr.kind {
            if data.method_name == "F" {
                let method = data.method.expect("call resolved");
                selected.push(analyzer.program.method(method).encoded_name.clone());
            }
        }
    }
    selected.sort();
    assert_eq!(selected, vec!["O:F:b,".to_string(), "O:F:i,".to_string()]);
}

#[test]
fn test_overload_no_match_is_an_error() {
    let errors = analyze_source(
        "class O { \
           method : public : F(x : Byte) ~ Nil { } \
           method : public : F(x : Int) ~ Nil { } \
           method : public : Go() ~ Nil { F(1.5); } \
         }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("undefined function/method call")));
}

#[test]
fn test_widening_installs_cast() {
    let analyzer = analyze_source(
        "class W { \
           method : public : F(x : Float) ~ Nil { } \
           method : public : Go() ~ Nil { F(7); } \
         }",
        TargetKind::Library,
    )
    .expect("analyzes");
    // the Int argument gained an implicit Float cast
    let cast_installed = analyzer.program.exprs.iter().any(|expr| {
        matches!(expr.kind, ExprKind::IntLit(7))
            && expr
                .cast_type
                .as_ref()
                .map(|ty| ty.kind == crate::types::TypeKind::Float)
                .unwrap_or(false)
    });
    assert!(cast_installed);
}

#[test]
fn test_interface_gap_reported() {
    let errors = analyze_source(
        "interface I { method : virtual : public : M() ~ Int; } \
         class B implements I { }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("not all methods have been implemented for the interface: I")));
}

#[test]
fn test_interface_satisfied() {
    analyze_source(
        "interface I { method : virtual : public : M() ~ Int; } \
         class B implements I { method : public : M() ~ Int { return 3; } }",
        TargetKind::Library,
    )
    .expect("analyzes");
}

#[test]
fn test_implementer_may_not_be_virtual() {
    let errors = analyze_source(
        "interface I { method : virtual : public : M() ~ Int; } \
         class B implements I { method : virtual : public : M() ~ Int; }",
        TargetKind::Library,
    )
    .unwrap_err();
    // B became virtual itself and its M is not a concrete implementation
    assert!(!errors.is_empty());
}

#[test]
fn test_default_parameter_expansion_keys() {
    let analyzer = analyze_source(
        "class D { \
           method : public : G(x : Int, y : Int := 1, z : Int := 2) ~ Int { return x; } \
         }",
        TargetKind::Library,
    )
    .expect("analyzes");
    let class = &analyzer.program.classes[0];
    assert!(class.method_map.contains_key("D:G:i,"));
    assert!(class.method_map.contains_key("D:G:i,i,"));
    assert!(class.method_map.contains_key("D:G:i,i,i,"));

    // the generated bodies forward to the full-arity method
    let short = class.method_map["D:G:i,"];
    let statements = analyzer
        .program
        .method(short)
        .statements
        .clone()
        .expect("generated body");
    let forwards = statements.iter().any(|stmt| {
        matches!(
            &analyzer.program.stmt(*stmt).kind,
            crate::ast::StmtKind::Return(Some(expr))
                if matches!(
                    &analyzer.program.expr(*expr).kind,
                    ExprKind::MethodCall(data)
                        if data.method.map(|m| analyzer.program.method(m).encoded_name == "D:G:i,i,i,")
                            .unwrap_or(false)
                )
        )
    });
    assert!(forwards);
}

#[test]
fn test_non_trailing_default_rejected() {
    let errors = analyze_source(
        "class D { method : public : G(x : Int := 1, y : Int) ~ Nil { } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("only trailing parameters may have default values")));
}

#[test]
fn test_default_on_virtual_rejected() {
    let errors = analyze_source(
        "class D { method : virtual : public : G(x : Int := 1) ~ Nil; }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("cannot contain default parameter values")));
}

#[test]
fn test_break_outside_loop() {
    let errors = analyze_source(
        "class B { method : public : M() ~ Nil { break; } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("breaks are only allowed in loops")));
}

#[test]
fn test_break_inside_loop_accepted() {
    analyze_source(
        "class B { method : public : M() ~ Nil { \
           while (true) { break; } \
         } }",
        TargetKind::Library,
    )
    .expect("analyzes");
}

#[test]
fn test_duplicate_select_labels() {
    let errors = analyze_source(
        "class S { method : public : M(x : Int) ~ Nil { \
           select (x) { label 1 : { } label 1 : { } } \
         } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors).iter().any(|m| m.contains("duplicate select value")));
}

#[test]
fn test_select_requires_integer_discriminant() {
    let errors = analyze_source(
        "class S { method : public : M(x : Bool) ~ Nil { \
           select (x) { label 1 : { } } \
         } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("expected integer expression")));
}

#[test]
fn test_enum_labels_resolve_in_select() {
    analyze_source(
        "enum Rank := 10 { Low, High } \
         class S { method : public : M(x : Int) ~ Nil { \
           select (x) { label Rank->Low : { } label Rank->High : { } } \
         } }",
        TargetKind::Library,
    )
    .expect("analyzes");
}

#[test]
fn test_var_inference_narrows_once() {
    let analyzer = analyze_source(
        "class V { method : public : M() ~ Int { v := 13; return v + 1; } }",
        TargetKind::Library,
    )
    .expect("analyzes");
    // the inferred entry ends up Int
    let narrowed = analyzer
        .program
        .entries
        .iter()
        .any(|entry| entry.name == "V:M:v" && entry.ty.kind == crate::types::TypeKind::Int);
    assert!(narrowed);
}

#[test]
fn test_missing_return_reported() {
    let errors = analyze_source(
        "class R { method : public : M() ~ Int { x : Int := 1; } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("does not return a value")));
}

#[test]
fn test_constructor_requires_parent_call() {
    let errors = analyze_source(
        "class A { New() { } } \
         class B from A { New() { x : Int := 1; } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors).iter().any(|m| m.contains("parent call required")));
}

#[test]
fn test_unrelated_class_cast_rejected() {
    let errors = analyze_source(
        "class A { } class B { } \
         class C { method : public : M(a : A) ~ Nil { b := a->As(B); } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("invalid cast between classes")));
}

#[test]
fn test_upcast_within_hierarchy_accepted() {
    analyze_source(
        "class Shape { New() { } } \
         class Circle from Shape { New() { Parent(); } } \
         class U { method : public : M(s : Shape) ~ Bool { \
           c := s->As(Circle); \
           ok := c->TypeOf(Circle); \
           return ok; \
         } }",
        TargetKind::Library,
    )
    .expect("analyzes");
}

#[test]
fn test_enum_to_enum_cast_requires_same_enum() {
    let errors = analyze_source(
        "enum A { X } enum B { Y } \
         class C { method : public : M(a : A) ~ Nil { b := a->As(B); } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("invalid cast between enums")));
}

#[test]
fn test_bool_numeric_mix_rejected() {
    let errors = analyze_source(
        "class C { method : public : M() ~ Nil { x := true + 1; x += 1; } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("invalid") || m.contains("Bool")));
}

#[test]
fn test_virtual_class_cannot_be_instantiated() {
    let errors = analyze_source(
        "class V { New() { } method : virtual : public : M() ~ Nil; } \
         class C { method : public : Go() ~ Nil { v := V->New(); v->M(); } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("cannot create an instance of a virtual class")));
}

#[test]
fn test_anonymous_class_requires_matching_constructor() {
    let errors = analyze_source(
        "interface Task { method : virtual : public : Run() ~ Nil; } \
         class C { method : public : Go() ~ Nil { \
           t := Task->New(13) { \
             New() { } \
             method : public : Run() ~ Nil { } \
           }; \
           t->Run(); \
         } }",
        TargetKind::Library,
    )
    .unwrap_err();
    // the arity-mismatched constructor fails the call site; the anonymous
    // pass reports against the same line
    assert!(messages(&errors).iter().any(|m| m.contains("New(..)")));
}

#[test]
fn test_anonymous_class_accepted_with_constructor() {
    analyze_source(
        "interface Task { method : virtual : public : Run() ~ Nil; } \
         class C { method : public : Go() ~ Nil { \
           t := Task->New() { \
             New() { } \
             method : public : Run() ~ Nil { } \
           }; \
           t->Run(); \
         } }",
        TargetKind::Library,
    )
    .expect("analyzes");
}

#[test]
fn test_diagnostics_collapse_per_line() {
    // two bad statements on one line surface as one diagnostic
    let errors = analyze_source(
        "class E { method : public : M() ~ Nil { break; break; } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert_eq!(errors.len(), 1);
}

#[test]
fn test_uses_must_resolve() {
    let errors = analyze_source(
        "use Phantom; class C { method : public : M() ~ Nil { } }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("bundle name 'Phantom' not defined")));
}

#[test]
fn test_function_reference_and_dynamic_call() {
    let analyzer = analyze_source(
        "class F { \
           function : Square(x : Int) ~ Int { return x * x; } \
           method : public : Go() ~ Int { \
             f : (Int) ~ Int := F->Square(Int) ~ Int; \
             return f(4); \
           } \
         }",
        TargetKind::Library,
    )
    .expect("analyzes");
    let dynamic_resolved = analyzer.program.exprs.iter().any(|expr| {
        matches!(&expr.kind, ExprKind::MethodCall(data) if data.dyn_func_entry.is_some())
    });
    assert!(dynamic_resolved);
}

#[test]
fn test_dynamic_call_signature_mismatch() {
    let errors = analyze_source(
        "class F { \
           function : Square(x : Int) ~ Int { return x * x; } \
           method : public : Go() ~ Int { \
             f : (Int) ~ Int := F->Square(Int) ~ Int; \
             return f(1.5); \
           } \
         }",
        TargetKind::Library,
    )
    .unwrap_err();
    assert!(messages(&errors)
        .iter()
        .any(|m| m.contains("undefined function/method call")));
}
