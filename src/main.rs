use clap::Parser;

use opal::diagnostic::render_diagnostics;
use opal::CompileError;

#[derive(Parser)]
#[command(name = "opal", version, about = "Opal compiler — classes in, bytecode out.")]
struct Cli {
    /// Comma-separated source files (.opl)
    #[arg(long, value_name = "FILES")]
    src: String,

    /// Comma-separated precompiled libraries (.obl)
    #[arg(long, value_name = "LIBS", default_value = "")]
    lib: String,

    /// Output file: .obe executable, .obl library, .obw web
    #[arg(long, value_name = "FILE")]
    dest: String,

    /// Embed line numbers and declaration names
    #[arg(long)]
    debug: bool,

    /// Render diagnostics as annotated source reports
    #[arg(long)]
    pretty: bool,
}

fn main() {
    let cli = Cli::parse();

    let paths: Vec<String> = cli
        .src
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect();
    if paths.is_empty() {
        eprintln!("no source files given");
        std::process::exit(1);
    }

    match opal::compile_files(&paths, &cli.lib, &cli.dest, cli.debug) {
        Ok(program) => {
            let (src_classes, lib_classes) = program.class_counts();
            println!(
                "compiled {} source {}.",
                src_classes,
                if src_classes == 1 { "class" } else { "classes" }
            );
            println!(
                "linked {} library {}.",
                lib_classes,
                if lib_classes == 1 { "class" } else { "classes" }
            );
        }
        Err(CompileError::Diagnostics(diagnostics)) => {
            for diagnostic in &diagnostics {
                let file = paths
                    .get(diagnostic.span.file_id as usize)
                    .map(String::as_str)
                    .unwrap_or("<input>");
                if cli.pretty {
                    if let Ok(source) = std::fs::read_to_string(file) {
                        render_diagnostics(std::slice::from_ref(diagnostic), file, &source);
                        continue;
                    }
                }
                eprintln!("{}", diagnostic.to_line(file));
            }
            std::process::exit(1);
        }
        Err(CompileError::Fatal(error)) => {
            eprintln!("{}", error);
            std::process::exit(1);
        }
    }
}
