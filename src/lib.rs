pub mod analyze;
pub mod ast;
pub mod diagnostic;
pub mod emit;
pub mod instr;
pub mod intermediate;
pub mod lexeme;
pub mod lexer;
pub mod linker;
pub mod parser;
pub mod span;
pub mod sym;
pub mod target;
pub mod types;

use analyze::{Analyzer, TargetKind};
use diagnostic::{Diagnostic, FatalError};
use emit::Emitter;
use intermediate::IntermediateProgram;
use lexer::Lexer;
use linker::Linker;
use parser::Parser;

/// How a compilation fails: recoverable diagnostics suppress emission;
/// fatal conditions abort outright.
#[derive(Debug)]
pub enum CompileError {
    Diagnostics(Vec<Diagnostic>),
    Fatal(FatalError),
}

impl From<FatalError> for CompileError {
    fn from(error: FatalError) -> Self {
        CompileError::Fatal(error)
    }
}

/// One source file handed to the compiler.
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

/// Runs the front end and emitter over in-memory sources, producing the
/// intermediate program ready for the target writer.
pub fn compile_sources(
    sources: &[SourceFile],
    libraries: &str,
    target: TargetKind,
    is_debug: bool,
) -> Result<IntermediateProgram, CompileError> {
    let mut program = ast::Program::new();
    let mut parse_errors = Vec::new();

    for source in sources {
        let file_id = program.add_file(source.name.clone());
        let (tokens, lex_errors) = Lexer::new(&source.text, file_id).tokenize();
        parse_errors.extend(lex_errors);
        if let Err(errors) = Parser::new(&mut program, tokens, source.name.clone()).parse() {
            parse_errors.extend(errors);
        }
    }
    if !parse_errors.is_empty() {
        return Err(CompileError::Diagnostics(parse_errors));
    }

    let linker = Linker::new(libraries.to_string());
    let mut analyzer = Analyzer::new(program, linker, target);
    analyzer.analyze()?;
    if !analyzer.diagnostics.is_empty() {
        let diagnostics = std::mem::take(&mut analyzer.diagnostics);
        return Err(CompileError::Diagnostics(diagnostics.into_sorted()));
    }

    let emitter = Emitter::new(analyzer.program, analyzer.linker, target, is_debug);
    Ok(emitter.translate()?)
}

/// Compiles source files from disk into the named output artifact.
pub fn compile_files(
    paths: &[String],
    libraries: &str,
    output: &str,
    is_debug: bool,
) -> Result<IntermediateProgram, CompileError> {
    let target = target::target_kind_for_path(output)?;

    let mut sources = Vec::new();
    for path in paths {
        let text = std::fs::read_to_string(path)
            .map_err(|_| FatalError::new(format!("unable to open file: {}", path)))?;
        sources.push(SourceFile {
            name: path.clone(),
            text,
        });
    }

    let program = compile_sources(&sources, libraries, target, is_debug)?;
    let writer = target::TargetEmitter::new(program, target, is_debug);
    writer.emit(output)?;
    Ok(writer.into_program())
}
