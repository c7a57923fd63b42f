//! The intermediate program: class/method/enum tables, literal pools, and
//! their serialization to the bytecode byte layout.
//!
//! Scalars are little-endian. Strings are length-prefixed UTF-8. Each
//! method's instruction stream is terminated by the `END_STMTS` sentinel.

use crate::instr::{Instruction, Opcode, ParamKind};

/// Bytecode format version.
pub const VERSION_NUM: i32 = 1;
pub const MAGIC_LIB: i32 = i32::from_le_bytes(*b"obl1");
pub const MAGIC_EXE: i32 = i32::from_le_bytes(*b"obe1");
pub const MAGIC_WEB: i32 = i32::from_le_bytes(*b"obw1");

pub fn write_int(value: i32, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_byte(value: u8, out: &mut Vec<u8>) {
    out.push(value);
}

pub fn write_double(value: f64, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_string(value: &str, out: &mut Vec<u8>) {
    let bytes = value.as_bytes();
    write_int(bytes.len() as i32, out);
    out.extend_from_slice(bytes);
}

/// A character is written as a length-prefixed UTF-8 sequence; NUL writes a
/// zero length.
pub fn write_char(value: char, out: &mut Vec<u8>) {
    if value == '\0' {
        write_int(0, out);
        return;
    }
    let mut buffer = [0u8; 4];
    let encoded = value.encode_utf8(&mut buffer);
    write_int(encoded.len() as i32, out);
    out.extend_from_slice(encoded.as_bytes());
}

/// One declaration-table row: a parameter kind plus, in debug builds, the
/// variable name.
#[derive(Clone, Debug, PartialEq)]
pub struct IntermediateDeclaration {
    pub name: String,
    pub kind: ParamKind,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntermediateDeclarations {
    pub declarations: Vec<IntermediateDeclaration>,
}

impl IntermediateDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parameter(&mut self, name: String, kind: ParamKind) {
        self.declarations.push(IntermediateDeclaration { name, kind });
    }

    pub fn write(&self, is_debug: bool, out: &mut Vec<u8>) {
        write_int(self.declarations.len() as i32, out);
        for declaration in &self.declarations {
            write_int(declaration.kind.into(), out);
            if is_debug {
                write_string(&declaration.name, out);
            }
        }
    }
}

/// Serializes one instruction. Operand layout is opcode-specific.
pub fn write_instruction(instr: &Instruction, is_debug: bool, out: &mut Vec<u8>) {
    write_byte(instr.op.into(), out);
    if is_debug {
        write_int(instr.line as i32, out);
    }
    match instr.op {
        Opcode::LoadIntLit
        | Opcode::NewFloatAry
        | Opcode::NewIntAry
        | Opcode::NewByteAry
        | Opcode::NewCharAry
        | Opcode::NewObjInst
        | Opcode::ObjInstCast
        | Opcode::ObjTypeOf
        | Opcode::Trap
        | Opcode::TrapRtrn
        | Opcode::Lbl => {
            write_int(instr.operand, out);
        }

        Opcode::LoadCharLit => {
            let value = char::from_u32(instr.operand as u32).unwrap_or('\0');
            write_char(value, out);
        }

        Opcode::MthdCall | Opcode::AsyncMthdCall => {
            write_int(instr.operand, out);
            write_int(instr.operand2, out);
            write_int(instr.operand3, out);
        }

        Opcode::LibNewObjInst | Opcode::LibObjInstCast => {
            write_string(&instr.operand5, out);
        }

        Opcode::LibMthdCall => {
            write_int(instr.operand3, out);
            write_string(&instr.operand5, out);
            write_string(&instr.operand6, out);
        }

        Opcode::LibFuncDef => {
            write_string(&instr.operand5, out);
            write_string(&instr.operand6, out);
        }

        Opcode::Jmp
        | Opcode::DynMthdCall
        | Opcode::LoadIntVar
        | Opcode::LoadFloatVar
        | Opcode::LoadFuncVar
        | Opcode::StorIntVar
        | Opcode::StorFloatVar
        | Opcode::StorFuncVar
        | Opcode::CopyIntVar
        | Opcode::CopyFloatVar
        | Opcode::CopyFuncVar
        | Opcode::LoadByteAryElm
        | Opcode::LoadCharAryElm
        | Opcode::LoadIntAryElm
        | Opcode::LoadFloatAryElm
        | Opcode::StorByteAryElm
        | Opcode::StorCharAryElm
        | Opcode::StorIntAryElm
        | Opcode::StorFloatAryElm => {
            write_int(instr.operand, out);
            write_int(instr.operand2, out);
        }

        Opcode::LoadFloatLit => {
            write_double(instr.operand4, out);
        }

        _ => {}
    }
}

#[derive(Clone, Debug)]
pub struct IntermediateMethod {
    pub id: i32,
    /// Encoded name, `Class:Simple:<params>`.
    pub name: String,
    pub rtrn_name: String,
    pub kind: i32,
    pub is_virtual: bool,
    pub has_and_or: bool,
    pub is_native: bool,
    pub is_function: bool,
    /// Local-frame byte size.
    pub space: i32,
    pub num_params: i32,
    pub entries: IntermediateDeclarations,
    pub instructions: Vec<Instruction>,
    pub is_lib: bool,
}

impl IntermediateMethod {
    pub fn write(&self, is_debug: bool, out: &mut Vec<u8>) {
        write_int(self.id, out);
        write_int(self.kind, out);
        write_int(self.is_virtual as i32, out);
        write_int(self.has_and_or as i32, out);
        write_int(self.is_native as i32, out);
        write_int(self.is_function as i32, out);
        write_string(&self.name, out);
        write_string(&self.rtrn_name, out);

        write_int(self.num_params, out);
        write_int(self.space, out);
        self.entries.write(is_debug, out);

        for instr in &self.instructions {
            write_instruction(instr, is_debug, out);
        }
        write_byte(Opcode::EndStmts.into(), out);
    }
}

#[derive(Clone, Debug)]
pub struct IntermediateClass {
    pub id: i32,
    pub name: String,
    pub pid: i32,
    pub parent_name: String,
    pub interface_ids: Vec<i32>,
    pub interface_names: Vec<String>,
    pub is_interface: bool,
    pub is_virtual: bool,
    pub is_debug: bool,
    pub file_name: String,
    pub cls_space: i32,
    pub inst_space: i32,
    pub cls_entries: IntermediateDeclarations,
    pub inst_entries: IntermediateDeclarations,
    pub methods: Vec<IntermediateMethod>,
    pub is_lib: bool,
}

impl IntermediateClass {
    pub fn write(&self, out: &mut Vec<u8>) {
        write_int(self.id, out);
        write_string(&self.name, out);
        write_int(self.pid, out);
        write_string(&self.parent_name, out);

        write_int(self.interface_ids.len() as i32, out);
        for id in &self.interface_ids {
            write_int(*id, out);
        }
        write_int(self.interface_names.len() as i32, out);
        for name in &self.interface_names {
            write_string(name, out);
        }

        write_int(self.is_interface as i32, out);
        write_int(self.is_virtual as i32, out);
        write_int(self.is_debug as i32, out);
        if self.is_debug {
            write_string(&self.file_name, out);
        }

        write_int(self.cls_space, out);
        write_int(self.inst_space, out);
        self.cls_entries.write(self.is_debug, out);
        self.inst_entries.write(self.is_debug, out);

        write_int(self.methods.len() as i32, out);
        for method in &self.methods {
            method.write(self.is_debug, out);
        }
    }
}

#[derive(Clone, Debug)]
pub struct IntermediateEnumItem {
    pub name: String,
    pub id: i32,
}

#[derive(Clone, Debug)]
pub struct IntermediateEnum {
    pub name: String,
    pub offset: i32,
    pub items: Vec<IntermediateEnumItem>,
}

impl IntermediateEnum {
    pub fn write(&self, out: &mut Vec<u8>) {
        write_string(&self.name, out);
        write_int(self.offset, out);
        write_int(self.items.len() as i32, out);
        for item in &self.items {
            write_string(&item.name, out);
            write_int(item.id, out);
        }
    }
}

/// The fully lowered program, ready for the target writer.
#[derive(Debug, Default)]
pub struct IntermediateProgram {
    pub enums: Vec<IntermediateEnum>,
    pub classes: Vec<IntermediateClass>,
    pub char_strings: Vec<String>,
    pub int_strings: Vec<Vec<i32>>,
    pub float_strings: Vec<Vec<f64>>,
    pub bundle_names: Vec<String>,
    pub start_class_id: i32,
    pub start_method_id: i32,
    pub string_cls_id: i32,
}

impl IntermediateProgram {
    pub fn new() -> Self {
        Self {
            start_class_id: -1,
            start_method_id: -1,
            string_cls_id: -1,
            ..Self::default()
        }
    }

    /// Counts of (source, library) classes, reported after emission.
    pub fn class_counts(&self) -> (usize, usize) {
        let lib = self.classes.iter().filter(|c| c.is_lib).count();
        (self.classes.len() - lib, lib)
    }

    pub fn write(&self, is_lib: bool, is_debug: bool, is_web: bool, out: &mut Vec<u8>) {
        write_int(VERSION_NUM, out);

        if is_lib {
            write_int(MAGIC_LIB, out);
        } else if is_web {
            write_int(MAGIC_WEB, out);
        } else {
            write_int(MAGIC_EXE, out);
        }

        // executables resolve 'System.String' up front
        if !is_lib {
            write_int(self.string_cls_id, out);
        }

        write_int(self.float_strings.len() as i32, out);
        for float_string in &self.float_strings {
            write_int(float_string.len() as i32, out);
            for value in float_string {
                write_double(*value, out);
            }
        }
        write_int(self.int_strings.len() as i32, out);
        for int_string in &self.int_strings {
            write_int(int_string.len() as i32, out);
            for value in int_string {
                write_int(*value, out);
            }
        }
        write_int(self.char_strings.len() as i32, out);
        for char_string in &self.char_strings {
            write_string(char_string, out);
        }

        if is_lib {
            write_int(self.bundle_names.len() as i32, out);
            for name in &self.bundle_names {
                write_string(name, out);
            }
        }

        if !is_lib {
            write_int(self.start_class_id, out);
            write_int(self.start_method_id, out);
        }

        write_int(self.enums.len() as i32, out);
        for eenum in &self.enums {
            eenum.write(out);
        }
        write_int(self.classes.len() as i32, out);
        for class in &self.classes {
            class.write(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_numbers_differ_by_flavor() {
        assert_ne!(MAGIC_LIB, MAGIC_EXE);
        assert_ne!(MAGIC_EXE, MAGIC_WEB);
        assert_ne!(MAGIC_LIB, MAGIC_WEB);
    }

    #[test]
    fn test_executable_header_layout() {
        let mut program = IntermediateProgram::new();
        program.string_cls_id = 5;
        let mut out = Vec::new();
        program.write(false, false, false, &mut out);

        assert_eq!(&out[0..4], &VERSION_NUM.to_le_bytes());
        assert_eq!(&out[4..8], &MAGIC_EXE.to_le_bytes());
        assert_eq!(&out[8..12], &5i32.to_le_bytes());
    }

    #[test]
    fn test_library_header_has_no_string_class() {
        let program = IntermediateProgram::new();
        let mut out = Vec::new();
        program.write(true, false, false, &mut out);

        assert_eq!(&out[4..8], &MAGIC_LIB.to_le_bytes());
        // float pool count follows the magic directly
        assert_eq!(&out[8..12], &0i32.to_le_bytes());
    }

    #[test]
    fn test_write_string_length_prefix() {
        let mut out = Vec::new();
        write_string("abc", &mut out);
        assert_eq!(&out[0..4], &3i32.to_le_bytes());
        assert_eq!(&out[4..], b"abc");
    }

    #[test]
    fn test_write_char_multibyte() {
        let mut out = Vec::new();
        write_char('é', &mut out);
        assert_eq!(&out[0..4], &2i32.to_le_bytes());
        assert_eq!(out.len(), 6);

        let mut nul = Vec::new();
        write_char('\0', &mut nul);
        assert_eq!(&nul[0..4], &0i32.to_le_bytes());
        assert_eq!(nul.len(), 4);
    }

    #[test]
    fn test_instruction_stream_terminated() {
        let method = IntermediateMethod {
            id: 0,
            name: "A:f:i,".to_string(),
            rtrn_name: "n".to_string(),
            kind: 0,
            is_virtual: false,
            has_and_or: false,
            is_native: false,
            is_function: false,
            space: 4,
            num_params: 1,
            entries: IntermediateDeclarations::new(),
            instructions: vec![Instruction::new(1, Opcode::Rtrn)],
            is_lib: false,
        };
        let mut out = Vec::new();
        method.write(false, &mut out);
        assert_eq!(out.last(), Some(&u8::from(Opcode::EndStmts)));
    }

    #[test]
    fn test_debug_gates_line_numbers() {
        let instr = Instruction::int1(42, Opcode::LoadIntLit, 7);
        let mut plain = Vec::new();
        write_instruction(&instr, false, &mut plain);
        let mut debug = Vec::new();
        write_instruction(&instr, true, &mut debug);
        assert_eq!(debug.len(), plain.len() + 4);
        assert_eq!(&debug[1..5], &42i32.to_le_bytes());
    }
}
