//! End-to-end scenarios: compile a miniature system library, link programs
//! against it, and check the emitted bytecode.

use std::io::Write;

use opal::analyze::TargetKind;
use opal::instr::Opcode;
use opal::intermediate::{IntermediateProgram, MAGIC_EXE, MAGIC_LIB, VERSION_NUM};
use opal::target::TargetEmitter;
use opal::{compile_sources, CompileError, SourceFile};

/// A minimal system library: the hierarchy root, boxed strings, and the
/// mutex class.
const SYSTEM_SOURCE: &str = r#"
use System;

bundle System {
    class Base {
        New() { }

        method : public : Size() ~ Int {
            return 0;
        }
    }

    class String from Base {
        New() { Parent(); }
        New(chars : Char[]) { Parent(); }

        method : public : Append(part : String) ~ Nil { }
        method : public : Append(value : Int) ~ Nil { }
        method : public : Append(value : Char) ~ Nil { }
        method : public : Append(value : Float) ~ Nil { }
        method : public : Append(value : Bool) ~ Nil { }
        method : public : Append(value : Byte) ~ Nil { }
    }
}

bundle System.Concurrency {
    class ThreadMutex from System.Base {
        New() { Parent(); }
    }
}
"#;

fn source(name: &str, text: &str) -> SourceFile {
    SourceFile {
        name: name.to_string(),
        text: text.to_string(),
    }
}

fn build_system_library() -> Vec<u8> {
    let program = compile_sources(
        &[source("system.opl", SYSTEM_SOURCE)],
        "",
        TargetKind::Library,
        false,
    )
    .expect("system library compiles");
    TargetEmitter::new(program, TargetKind::Library, false).to_bytes()
}

fn write_temp_library(bytes: &[u8], name: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create library");
    file.write_all(bytes).expect("write library");
    (dir, path.to_string_lossy().to_string())
}

fn compile_executable(text: &str, libraries: &str) -> Result<IntermediateProgram, CompileError> {
    compile_sources(
        &[source("main.opl", text)],
        libraries,
        TargetKind::Executable,
        false,
    )
}

#[test]
fn test_system_library_header() {
    let bytes = build_system_library();
    assert_eq!(&bytes[0..4], &VERSION_NUM.to_le_bytes());
    assert_eq!(&bytes[4..8], &MAGIC_LIB.to_le_bytes());
}

#[test]
fn test_library_compilation_is_deterministic() {
    let first = build_system_library();
    let second = build_system_library();
    assert_eq!(first, second);
}

#[test]
fn test_hello_world_against_system_library() {
    let library = build_system_library();
    let (_dir, path) = write_temp_library(&library, "system.obl");

    let program = compile_executable(
        "use System; \
         class Hello { function : Main(args : System.String[]) ~ Nil { } }",
        &path,
    )
    .expect("hello world compiles");

    // entry ids point at Hello:Main and the string class resolved
    let hello = program
        .classes
        .iter()
        .find(|class| class.name == "Hello")
        .expect("Hello emitted");
    assert_eq!(program.start_class_id, hello.id);
    assert!(program.string_cls_id >= 0);

    let string_class = program
        .classes
        .iter()
        .find(|class| class.id == program.string_cls_id)
        .expect("string class emitted");
    assert_eq!(string_class.name, "System.String");

    let main = hello
        .methods
        .iter()
        .find(|method| method.name == "Hello:Main:o.System.String*,")
        .expect("Main emitted");
    assert_eq!(main.instructions.last().map(|i| i.op), Some(Opcode::Rtrn));

    // serialized header: version, executable magic, string class id
    let expected_string_id = program.string_cls_id;
    let bytes = TargetEmitter::new(program, TargetKind::Executable, false).to_bytes();
    assert_eq!(&bytes[0..4], &VERSION_NUM.to_le_bytes());
    assert_eq!(&bytes[4..8], &MAGIC_EXE.to_le_bytes());
    let string_id = i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    assert_eq!(string_id, expected_string_id);
}

#[test]
fn test_interpolated_string_lowering_against_library() {
    let library = build_system_library();
    let (_dir, path) = write_temp_library(&library, "system.obl");

    let program = compile_executable(
        "use System; \
         class Hello { \
           function : Main(args : System.String[]) ~ Nil { \
             count : Int := 3; \
             s : System.String := \"found {$count} ships\"; \
           } \
         }",
        &path,
    )
    .expect("interpolation compiles");

    // both literal segments interned
    assert!(program.char_strings.iter().any(|value| value == "found "));
    assert!(program.char_strings.iter().any(|value| value == " ships"));

    // the accumulator drives Append calls on the resolved string class
    let hello = program
        .classes
        .iter()
        .find(|class| class.name == "Hello")
        .expect("Hello emitted");
    let main = &hello.methods[0];
    let append_calls = main
        .instructions
        .iter()
        .filter(|i| i.op == Opcode::MthdCall && i.operand == program.string_cls_id)
        .count();
    assert!(append_calls >= 2);
}

#[test]
fn test_cross_library_string_interning() {
    // two libraries intern the same "abc" literal at different local ids
    let first = compile_sources(
        &[source(
            "one.opl",
            "use System; \
             bundle System { \
               class Base { New() { } } \
               class String from Base { \
                 New() { Parent(); } \
                 New(chars : Char[]) { Parent(); } \
                 method : public : Append(part : String) ~ Nil { } \
               } \
             } \
             bundle One { \
               class Tagger { \
                 method : public : Tag() ~ System.String { \
                   return \"abc\"; \
                 } \
               } \
             }",
        )],
        "",
        TargetKind::Library,
        false,
    )
    .expect("first library compiles");
    let first_bytes = TargetEmitter::new(first, TargetKind::Library, false).to_bytes();
    let (_dir1, first_path) = write_temp_library(&first_bytes, "one.obl");

    let second = compile_sources(
        &[source(
            "two.opl",
            "use One; use System; \
             bundle Two { \
               class Marker { \
                 method : public : Mark() ~ System.String { \
                   return \"abc\"; \
                 } \
               } \
             }",
        )],
        &first_path,
        TargetKind::Library,
        false,
    )
    .expect("second library compiles");
    let second_bytes = TargetEmitter::new(second, TargetKind::Library, false).to_bytes();
    let (_dir2, second_path) = write_temp_library(&second_bytes, "two.obl");

    let libraries = format!("{},{}", first_path, second_path);
    let program = compile_executable(
        "use System; use One; use Two; \
         class Main { \
           function : Main(args : System.String[]) ~ Nil { } \
         }",
        &libraries,
    )
    .expect("executable links both libraries");

    // "abc" merged to a single pool entry
    let occurrences = program
        .char_strings
        .iter()
        .filter(|value| *value == &"abc".to_string())
        .count();
    assert_eq!(occurrences, 1);
}

#[test]
fn test_diagnostics_suppress_emission() {
    let result = compile_executable("class Broken { function : Main(args : Int[]) ~ Nil { y := x + 1; } }", "");
    match result {
        Err(CompileError::Diagnostics(diagnostics)) => {
            assert!(!diagnostics.is_empty());
        }
        _ => panic!("expected diagnostics"),
    }
}

#[test]
fn test_compile_files_end_to_end() {
    let library = build_system_library();
    let (dir, lib_path) = write_temp_library(&library, "system.obl");

    let src_path = dir.path().join("hello.opl");
    std::fs::write(
        &src_path,
        "use System;\nclass Hello { function : Main(args : System.String[]) ~ Nil { } }\n",
    )
    .expect("write source");
    let out_path = dir.path().join("hello.obe");

    opal::compile_files(
        &[src_path.to_string_lossy().to_string()],
        &lib_path,
        &out_path.to_string_lossy(),
        false,
    )
    .expect("compiles to disk");

    let bytes = std::fs::read(&out_path).expect("artifact written");
    assert_eq!(&bytes[4..8], &MAGIC_EXE.to_le_bytes());
}

#[test]
fn test_mismatched_output_extension_is_fatal() {
    let result = opal::compile_files(
        &["missing.opl".to_string()],
        "",
        "out.bin",
        false,
    );
    match result {
        Err(CompileError::Fatal(error)) => {
            assert!(error.message.contains("unknown output extension"));
        }
        _ => panic!("expected a fatal extension error"),
    }
}
