//! Loads precompiled `.obl` libraries and exposes class/enum/method lookup
//! to the analyzer and emitter.
//!
//! A library file is read whole into a byte buffer and decoded with a
//! cursor. Method parameter types are re-parsed from the mangled method
//! name; return types from the stored return encoding. Cross-library
//! literal-pool references and symbolic call sites are rewritten during
//! emission.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::ast::{ClassId, STRING_CLASS_NAME};
use crate::diagnostic::FatalError;
use crate::instr::{Instruction, Opcode, ParamKind, Trap};
use crate::intermediate::{IntermediateDeclarations, MAGIC_LIB, VERSION_NUM};
use crate::types::{decode_parameter_list, decode_return, Type};

/// Environment variable naming the library search root.
pub const LIB_PATH_ENV: &str = "OPAL_LIB_PATH";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LibClassId {
    pub lib: u16,
    pub class: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LibMethodId {
    pub lib: u16,
    pub class: u32,
    pub method: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LibEnumId {
    pub lib: u16,
    pub index: u32,
}

impl LibMethodId {
    pub fn class_id(self) -> LibClassId {
        LibClassId {
            lib: self.lib,
            class: self.class,
        }
    }
}

/// Byte cursor over a loaded library buffer. Every read checks bounds; a
/// short buffer is a malformed library.
struct Cursor<'a> {
    buffer: &'a [u8],
    pos: usize,
    path: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(buffer: &'a [u8], path: &'a str) -> Self {
        Self {
            buffer,
            pos: 0,
            path,
        }
    }

    fn malformed(&self) -> FatalError {
        FatalError::new(format!("malformed library file: {}", self.path))
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], FatalError> {
        if self.pos + count > self.buffer.len() {
            return Err(self.malformed());
        }
        let slice = &self.buffer[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn read_byte(&mut self) -> Result<u8, FatalError> {
        Ok(self.take(1)?[0])
    }

    fn read_int(&mut self) -> Result<i32, FatalError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_double(&mut self) -> Result<f64, FatalError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    fn read_string(&mut self) -> Result<String, FatalError> {
        let size = self.read_int()?;
        if size < 0 {
            return Err(self.malformed());
        }
        let bytes = self.take(size as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.malformed())
    }

    fn read_char(&mut self) -> Result<char, FatalError> {
        let size = self.read_int()?;
        if size == 0 {
            return Ok('\0');
        }
        if size < 0 || size > 4 {
            return Err(self.malformed());
        }
        let bytes = self.take(size as usize)?;
        let text = std::str::from_utf8(bytes).map_err(|_| self.malformed())?;
        text.chars().next().ok_or_else(|| self.malformed())
    }
}

#[derive(Clone, Debug)]
pub struct LibraryEnumItem {
    pub name: String,
    pub id: i32,
}

#[derive(Clone, Debug)]
pub struct LibraryEnum {
    pub name: String,
    pub offset: i32,
    pub items: Vec<LibraryEnumItem>,
}

impl LibraryEnum {
    pub fn item(&self, name: &str) -> Option<&LibraryEnumItem> {
        self.items.iter().find(|item| item.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct LibraryMethod {
    pub id: i32,
    /// Encoded name, `Class:Simple:<params>`.
    pub name: String,
    pub rtrn_name: String,
    pub kind: i32,
    pub is_virtual: bool,
    pub has_and_or: bool,
    pub is_native: bool,
    pub is_function: bool,
    pub num_params: i32,
    pub space: i32,
    pub entries: IntermediateDeclarations,
    pub instructions: Vec<Instruction>,
    /// Parameter types re-parsed from the mangled name.
    pub declarations: Vec<Type>,
    pub rtrn_type: Type,
}

impl LibraryMethod {
    /// Parameter encodings live past the last ':' of the encoded name.
    fn parse_parameters(name: &str) -> Vec<Type> {
        match name.rfind(':') {
            Some(start) => decode_parameter_list(&name[start + 1..]),
            None => Vec::new(),
        }
    }

    pub fn simple_name(&self) -> &str {
        let mut parts = self.name.split(':');
        parts.next();
        parts.next().unwrap_or("")
    }

    pub fn is_static(&self) -> bool {
        self.is_function
    }
}

#[derive(Clone, Debug)]
pub struct LibraryClass {
    /// Emission-time id; assigned before code generation.
    pub id: i32,
    pub name: String,
    pub parent_name: String,
    pub interface_names: Vec<String>,
    pub interface_ids: Vec<i32>,
    pub is_interface: bool,
    pub is_virtual: bool,
    pub is_debug: bool,
    pub file_name: String,
    pub cls_space: i32,
    pub inst_space: i32,
    pub cls_entries: IntermediateDeclarations,
    pub inst_entries: IntermediateDeclarations,
    pub methods: Vec<LibraryMethod>,
    method_map: HashMap<String, u32>,
    unqualified_methods: HashMap<String, Vec<u32>>,
    /// Program classes inheriting from this library class.
    pub children: Vec<ClassId>,
    pub lib_children: Vec<LibClassId>,
    pub was_called: bool,
}

impl LibraryClass {
    fn index_methods(&mut self) {
        for (index, method) in self.methods.iter().enumerate() {
            self.method_map.insert(method.name.clone(), index as u32);
            let simple = method.simple_name().to_string();
            self.unqualified_methods
                .entry(simple)
                .or_default()
                .push(index as u32);
        }
    }

    pub fn method_index(&self, encoded_name: &str) -> Option<u32> {
        self.method_map.get(encoded_name).copied()
    }

    pub fn unqualified_method_indices(&self, simple_name: &str) -> &[u32] {
        self.unqualified_methods
            .get(simple_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Locations of instructions that reference a literal-pool index:
/// (class, method, instruction).
type PoolUses = Vec<Vec<(u32, u32, u32)>>;

#[derive(Debug)]
pub struct Library {
    pub path: String,
    pub bundle_names: Vec<String>,
    pub enums: Vec<LibraryEnum>,
    pub classes: Vec<LibraryClass>,
    class_map: HashMap<String, u32>,
    pub char_strings: Vec<String>,
    pub int_strings: Vec<Vec<i32>>,
    pub float_strings: Vec<Vec<f64>>,
    pub char_string_uses: PoolUses,
    pub int_string_uses: PoolUses,
    pub float_string_uses: PoolUses,
}

impl Library {
    pub fn load(path: &str) -> Result<Library, FatalError> {
        let buffer = std::fs::read(path)
            .map_err(|_| FatalError::new(format!("unable to open file: {}", path)))?;
        Self::from_buffer(&buffer, path)
    }

    pub fn from_buffer(buffer: &[u8], path: &str) -> Result<Library, FatalError> {
        let mut cursor = Cursor::new(buffer, path);

        let version = cursor.read_int()?;
        if version != VERSION_NUM {
            return Err(FatalError::new(format!(
                "unknown bytecode version {} in library: {}",
                version, path
            )));
        }
        let magic = cursor.read_int()?;
        if magic != MAGIC_LIB {
            return Err(FatalError::new(format!("not a library file: {}", path)));
        }

        // literal pools
        let mut float_strings = Vec::new();
        let float_count = cursor.read_int()?;
        for _ in 0..float_count {
            let length = cursor.read_int()?;
            let mut values = Vec::with_capacity(length.max(0) as usize);
            for _ in 0..length {
                values.push(cursor.read_double()?);
            }
            float_strings.push(values);
        }
        let mut int_strings = Vec::new();
        let int_count = cursor.read_int()?;
        for _ in 0..int_count {
            let length = cursor.read_int()?;
            let mut values = Vec::with_capacity(length.max(0) as usize);
            for _ in 0..length {
                values.push(cursor.read_int()?);
            }
            int_strings.push(values);
        }
        let mut char_strings = Vec::new();
        let char_count = cursor.read_int()?;
        for _ in 0..char_count {
            char_strings.push(cursor.read_string()?);
        }

        let mut bundle_names = Vec::new();
        let bundle_count = cursor.read_int()?;
        for _ in 0..bundle_count {
            bundle_names.push(cursor.read_string()?);
        }

        // enums
        let mut enums = Vec::new();
        let enum_count = cursor.read_int()?;
        for _ in 0..enum_count {
            let name = cursor.read_string()?;
            let offset = cursor.read_int()?;
            let item_count = cursor.read_int()?;
            let mut items = Vec::with_capacity(item_count.max(0) as usize);
            for _ in 0..item_count {
                let item_name = cursor.read_string()?;
                let id = cursor.read_int()?;
                items.push(LibraryEnumItem { name: item_name, id });
            }
            enums.push(LibraryEnum {
                name,
                offset,
                items,
            });
        }

        // classes
        let mut classes = Vec::new();
        let mut class_map = HashMap::new();
        let class_count = cursor.read_int()?;
        for _ in 0..class_count {
            let class = Self::load_class(&mut cursor)?;
            class_map.insert(class.name.clone(), classes.len() as u32);
            classes.push(class);
        }

        let mut library = Library {
            path: path.to_string(),
            bundle_names,
            enums,
            classes,
            class_map,
            char_strings,
            int_strings,
            float_strings,
            char_string_uses: Vec::new(),
            int_string_uses: Vec::new(),
            float_string_uses: Vec::new(),
        };
        library.index_pool_uses();
        Ok(library)
    }

    fn load_class(cursor: &mut Cursor<'_>) -> Result<LibraryClass, FatalError> {
        let _id = cursor.read_int()?;
        let name = cursor.read_string()?;
        let _pid = cursor.read_int()?;
        let parent_name = cursor.read_string()?;

        let interface_id_count = cursor.read_int()?;
        let mut interface_ids = Vec::with_capacity(interface_id_count.max(0) as usize);
        for _ in 0..interface_id_count {
            interface_ids.push(cursor.read_int()?);
        }
        let interface_name_count = cursor.read_int()?;
        let mut interface_names = Vec::with_capacity(interface_name_count.max(0) as usize);
        for _ in 0..interface_name_count {
            interface_names.push(cursor.read_string()?);
        }

        let is_interface = cursor.read_int()? != 0;
        let is_virtual = cursor.read_int()? != 0;
        let is_debug = cursor.read_int()? != 0;
        let file_name = if is_debug {
            cursor.read_string()?
        } else {
            String::new()
        };

        let cls_space = cursor.read_int()?;
        let inst_space = cursor.read_int()?;
        let cls_entries = Self::load_entries(cursor, is_debug)?;
        let inst_entries = Self::load_entries(cursor, is_debug)?;

        let method_count = cursor.read_int()?;
        let mut methods = Vec::with_capacity(method_count.max(0) as usize);
        for _ in 0..method_count {
            methods.push(Self::load_method(cursor, is_debug)?);
        }

        // string boxing must survive dead-class pruning
        let was_called = name == STRING_CLASS_NAME;

        let mut class = LibraryClass {
            id: -1,
            name,
            parent_name,
            interface_names,
            interface_ids,
            is_interface,
            is_virtual,
            is_debug,
            file_name,
            cls_space,
            inst_space,
            cls_entries,
            inst_entries,
            methods,
            method_map: HashMap::new(),
            unqualified_methods: HashMap::new(),
            children: Vec::new(),
            lib_children: Vec::new(),
            was_called,
        };
        class.index_methods();
        Ok(class)
    }

    fn load_entries(
        cursor: &mut Cursor<'_>,
        is_debug: bool,
    ) -> Result<IntermediateDeclarations, FatalError> {
        let mut entries = IntermediateDeclarations::new();
        let count = cursor.read_int()?;
        for _ in 0..count {
            let raw = cursor.read_int()?;
            let kind = ParamKind::try_from(raw).map_err(|_| cursor.malformed())?;
            let name = if is_debug {
                cursor.read_string()?
            } else {
                String::new()
            };
            entries.add_parameter(name, kind);
        }
        Ok(entries)
    }

    fn load_method(cursor: &mut Cursor<'_>, is_debug: bool) -> Result<LibraryMethod, FatalError> {
        let id = cursor.read_int()?;
        let kind = cursor.read_int()?;
        let is_virtual = cursor.read_int()? != 0;
        let has_and_or = cursor.read_int()? != 0;
        let is_native = cursor.read_int()? != 0;
        let is_function = cursor.read_int()? != 0;
        let name = cursor.read_string()?;
        let rtrn_name = cursor.read_string()?;
        let num_params = cursor.read_int()?;
        let space = cursor.read_int()?;
        let entries = Self::load_entries(cursor, is_debug)?;
        let instructions = Self::load_statements(cursor, is_debug)?;

        let declarations = LibraryMethod::parse_parameters(&name);
        let rtrn_type = decode_return(&rtrn_name);

        Ok(LibraryMethod {
            id,
            name,
            rtrn_name,
            kind,
            is_virtual,
            has_and_or,
            is_native,
            is_function,
            num_params,
            space,
            entries,
            instructions,
            declarations,
            rtrn_type,
        })
    }

    fn load_statements(
        cursor: &mut Cursor<'_>,
        is_debug: bool,
    ) -> Result<Vec<Instruction>, FatalError> {
        let mut instructions = Vec::new();
        loop {
            let raw = cursor.read_byte()?;
            let op = Opcode::try_from(raw).map_err(|_| cursor.malformed())?;
            if op == Opcode::EndStmts {
                return Ok(instructions);
            }
            let line = if is_debug {
                cursor.read_int()?.max(0) as u32
            } else {
                0
            };

            let mut instr = Instruction::new(line, op);
            match op {
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
                    instr.operand = cursor.read_int()?;
                }

                Opcode::LoadCharLit => {
                    instr.operand = cursor.read_char()? as i32;
                }

                Opcode::MthdCall | Opcode::AsyncMthdCall => {
                    instr.operand = cursor.read_int()?;
                    instr.operand2 = cursor.read_int()?;
                    instr.operand3 = cursor.read_int()?;
                }

                Opcode::LibNewObjInst | Opcode::LibObjInstCast => {
                    instr.operand5 = cursor.read_string()?;
                }

                Opcode::LibMthdCall => {
                    instr.operand3 = cursor.read_int()?;
                    instr.operand5 = cursor.read_string()?;
                    instr.operand6 = cursor.read_string()?;
                }

                Opcode::LibFuncDef => {
                    instr.operand5 = cursor.read_string()?;
                    instr.operand6 = cursor.read_string()?;
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
                    instr.operand = cursor.read_int()?;
                    instr.operand2 = cursor.read_int()?;
                }

                Opcode::LoadFloatLit => {
                    instr.operand4 = cursor.read_double()?;
                }

                _ => {}
            }
            instructions.push(instr);
        }
    }

    /// Finds every instruction referencing a literal-pool index: the id load
    /// directly before a copy-trap directive load.
    fn index_pool_uses(&mut self) {
        self.char_string_uses = vec![Vec::new(); self.char_strings.len()];
        self.int_string_uses = vec![Vec::new(); self.int_strings.len()];
        self.float_string_uses = vec![Vec::new(); self.float_strings.len()];

        for (class_idx, class) in self.classes.iter().enumerate() {
            for (method_idx, method) in class.methods.iter().enumerate() {
                for window in 1..method.instructions.len() {
                    let current = &method.instructions[window];
                    let previous = &method.instructions[window - 1];
                    if current.op != Opcode::LoadIntLit || previous.op != Opcode::LoadIntLit {
                        continue;
                    }
                    let location = (class_idx as u32, method_idx as u32, window as u32 - 1);
                    let pool_id = previous.operand;
                    match Trap::try_from(current.operand) {
                        Ok(Trap::CpyCharStrAry) => {
                            if let Some(uses) = self.char_string_uses.get_mut(pool_id as usize) {
                                uses.push(location);
                            }
                        }
                        Ok(Trap::CpyIntStrAry) => {
                            if let Some(uses) = self.int_string_uses.get_mut(pool_id as usize) {
                                uses.push(location);
                            }
                        }
                        Ok(Trap::CpyFloatStrAry) => {
                            if let Some(uses) = self.float_string_uses.get_mut(pool_id as usize) {
                                uses.push(location);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    pub fn get_class_index(&self, name: &str) -> Option<u32> {
        self.class_map.get(name).copied()
    }

    pub fn get_enum(&self, name: &str) -> Option<&LibraryEnum> {
        self.enums.iter().find(|eenum| eenum.name == name)
    }

    pub fn has_bundle_name(&self, name: &str) -> bool {
        self.bundle_names.iter().any(|bundle| bundle == name)
    }

    /// Patches one instruction's pool operand after a merge.
    pub fn patch_pool_operand(&mut self, location: (u32, u32, u32), merged_id: i32) {
        let (class, method, instr) = location;
        let instruction = &mut self.classes[class as usize].methods[method as usize].instructions
            [instr as usize];
        instruction.operand = merged_id;
    }
}

/// Manages the loaded libraries and cross-library resolution.
#[derive(Debug, Default)]
pub struct Linker {
    pub libraries: Vec<Library>,
    master_path: String,
}

impl Linker {
    pub fn new(master_path: String) -> Self {
        Self {
            libraries: Vec::new(),
            master_path,
        }
    }

    /// Loads every configured library. Paths are comma-separated; the
    /// optional `OPAL_LIB_PATH` root is prefixed to each.
    pub fn load(&mut self) -> Result<(), FatalError> {
        if self.master_path.is_empty() {
            return Ok(());
        }
        let root = std::env::var(LIB_PATH_ENV).unwrap_or_default();
        let master_path = self.master_path.clone();
        for file in master_path.split(',') {
            let file = file.trim();
            if file.is_empty() {
                continue;
            }
            let path = if root.is_empty() {
                PathBuf::from(file)
            } else {
                PathBuf::from(&root).join(file)
            };
            let library = Library::load(&path.to_string_lossy())?;
            self.libraries.push(library);
        }
        Ok(())
    }

    pub fn add_library(&mut self, library: Library) {
        self.libraries.push(library);
    }

    pub fn class(&self, id: LibClassId) -> &LibraryClass {
        &self.libraries[id.lib as usize].classes[id.class as usize]
    }

    pub fn class_mut(&mut self, id: LibClassId) -> &mut LibraryClass {
        &mut self.libraries[id.lib as usize].classes[id.class as usize]
    }

    pub fn method(&self, id: LibMethodId) -> &LibraryMethod {
        &self.libraries[id.lib as usize].classes[id.class as usize].methods[id.method as usize]
    }

    pub fn enum_(&self, id: LibEnumId) -> &LibraryEnum {
        &self.libraries[id.lib as usize].enums[id.index as usize]
    }

    /// Encoded-name lookup on one class.
    pub fn find_method(&self, class_id: LibClassId, encoded_name: &str) -> Option<LibMethodId> {
        let class = self.class(class_id);
        class.method_index(encoded_name).map(|method| LibMethodId {
            lib: class_id.lib,
            class: class_id.class,
            method,
        })
    }

    pub fn unqualified_methods(&self, class_id: LibClassId, simple_name: &str) -> Vec<LibMethodId> {
        let class = self.class(class_id);
        class
            .unqualified_method_indices(simple_name)
            .iter()
            .map(|&method| LibMethodId {
                lib: class_id.lib,
                class: class_id.class,
                method,
            })
            .collect()
    }

    /// Exact name across all libraries first, then each use-prefix
    /// concatenated with the name. First hit wins.
    pub fn search_class_libraries(&self, name: &str, uses: &[String]) -> Option<LibClassId> {
        for (lib, library) in self.libraries.iter().enumerate() {
            if let Some(class) = library.get_class_index(name) {
                return Some(LibClassId {
                    lib: lib as u16,
                    class,
                });
            }
        }
        for use_name in uses {
            let qualified = format!("{}.{}", use_name, name);
            for (lib, library) in self.libraries.iter().enumerate() {
                if let Some(class) = library.get_class_index(&qualified) {
                    return Some(LibClassId {
                        lib: lib as u16,
                        class,
                    });
                }
            }
        }
        None
    }

    pub fn search_enum_libraries(&self, name: &str, uses: &[String]) -> Option<LibEnumId> {
        for (lib, library) in self.libraries.iter().enumerate() {
            if let Some(index) = library.enums.iter().position(|eenum| eenum.name == name) {
                return Some(LibEnumId {
                    lib: lib as u16,
                    index: index as u32,
                });
            }
        }
        for use_name in uses {
            let qualified = format!("{}.{}", use_name, name);
            for (lib, library) in self.libraries.iter().enumerate() {
                if let Some(index) = library.enums.iter().position(|eenum| eenum.name == qualified)
                {
                    return Some(LibEnumId {
                        lib: lib as u16,
                        index: index as u32,
                    });
                }
            }
        }
        None
    }

    pub fn has_bundle_name(&self, name: &str) -> bool {
        self.libraries.iter().any(|library| library.has_bundle_name(name))
    }

    pub fn all_class_ids(&self) -> Vec<LibClassId> {
        let mut ids = Vec::new();
        for (lib, library) in self.libraries.iter().enumerate() {
            for class in 0..library.classes.len() {
                ids.push(LibClassId {
                    lib: lib as u16,
                    class: class as u32,
                });
            }
        }
        ids
    }

    pub fn all_enum_ids(&self) -> Vec<LibEnumId> {
        let mut ids = Vec::new();
        for (lib, library) in self.libraries.iter().enumerate() {
            for index in 0..library.enums.len() {
                ids.push(LibEnumId {
                    lib: lib as u16,
                    index: index as u32,
                });
            }
        }
        ids
    }

    /// Links each library class's parent name to another library class when
    /// one exists, recording the child back-edge. A miss is left for the
    /// analyzer: the program may still supply the parent.
    pub fn resolve_external_classes(&mut self) {
        let ids = self.all_class_ids();
        for id in &ids {
            let parent_name = self.class(*id).parent_name.clone();
            if parent_name.is_empty() {
                continue;
            }
            if let Some(parent) = self.search_class_libraries(&parent_name, &[]) {
                if parent != *id {
                    self.class_mut(parent).lib_children.push(*id);
                }
            }
        }
    }

    /// Merges every library's literal pools into the program's pools,
    /// deduplicating by value, and rewrites every library instruction that
    /// referenced a library-local pool index to the merged index.
    pub fn resolve_external_method_calls(
        &mut self,
        char_pool: &mut Vec<String>,
        int_pool: &mut Vec<Vec<i32>>,
        float_pool: &mut Vec<Vec<f64>>,
    ) {
        for library in &mut self.libraries {
            for (local_id, value) in library.char_strings.clone().into_iter().enumerate() {
                let merged = match char_pool.iter().position(|existing| *existing == value) {
                    Some(pos) => pos,
                    None => {
                        char_pool.push(value);
                        char_pool.len() - 1
                    }
                };
                for location in library.char_string_uses[local_id].clone() {
                    library.patch_pool_operand(location, merged as i32);
                }
            }
            for (local_id, value) in library.int_strings.clone().into_iter().enumerate() {
                let merged = match int_pool.iter().position(|existing| *existing == value) {
                    Some(pos) => pos,
                    None => {
                        int_pool.push(value);
                        int_pool.len() - 1
                    }
                };
                for location in library.int_string_uses[local_id].clone() {
                    library.patch_pool_operand(location, merged as i32);
                }
            }
            for (local_id, value) in library.float_strings.clone().into_iter().enumerate() {
                let merged = match float_pool.iter().position(|existing| {
                    existing.len() == value.len()
                        && existing.iter().zip(value.iter()).all(|(a, b)| a == b)
                }) {
                    Some(pos) => pos,
                    None => {
                        float_pool.push(value);
                        float_pool.len() - 1
                    }
                };
                for location in library.float_string_uses[local_id].clone() {
                    library.patch_pool_operand(location, merged as i32);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intermediate::{
        IntermediateClass, IntermediateMethod, IntermediateProgram,
    };

    fn sample_library_bytes() -> Vec<u8> {
        let mut program = IntermediateProgram::new();
        program.char_strings.push("abc".to_string());
        program.bundle_names.push("Fleet".to_string());
        program.enums.push(crate::intermediate::IntermediateEnum {
            name: "Fleet.Rank".to_string(),
            offset: 100,
            items: vec![crate::intermediate::IntermediateEnumItem {
                name: "Captain".to_string(),
                id: 100,
            }],
        });
        program.classes.push(IntermediateClass {
            id: 0,
            name: "Fleet.Ship".to_string(),
            pid: -1,
            parent_name: String::new(),
            interface_ids: Vec::new(),
            interface_names: Vec::new(),
            is_interface: false,
            is_virtual: false,
            is_debug: false,
            file_name: String::new(),
            cls_space: 0,
            inst_space: 4,
            cls_entries: IntermediateDeclarations::new(),
            inst_entries: IntermediateDeclarations::new(),
            methods: vec![IntermediateMethod {
                id: 0,
                name: "Fleet.Ship:Speed:i,".to_string(),
                rtrn_name: "i".to_string(),
                kind: 0,
                is_virtual: false,
                has_and_or: false,
                is_native: false,
                is_function: false,
                space: 8,
                num_params: 1,
                entries: IntermediateDeclarations::new(),
                instructions: vec![
                    Instruction::int1(3, Opcode::LoadIntLit, 3),
                    Instruction::int1(3, Opcode::NewCharAry, 1),
                    Instruction::int1(3, Opcode::LoadIntLit, 0),
                    Instruction::int1(3, Opcode::LoadIntLit, Trap::CpyCharStrAry.into()),
                    Instruction::int1(3, Opcode::TrapRtrn, 3),
                    Instruction::new(4, Opcode::Rtrn),
                ],
                is_lib: true,
            }],
            is_lib: true,
        });

        let mut out = Vec::new();
        program.write(true, false, false, &mut out);
        out
    }

    #[test]
    fn test_round_trip_write_read_write() {
        let bytes = sample_library_bytes();
        let library = Library::from_buffer(&bytes, "fleet.obl").expect("loads");

        assert_eq!(library.bundle_names, vec!["Fleet".to_string()]);
        assert_eq!(library.char_strings, vec!["abc".to_string()]);
        assert_eq!(library.enums.len(), 1);
        assert_eq!(library.enums[0].offset, 100);
        assert_eq!(library.classes.len(), 1);

        let class = &library.classes[0];
        assert_eq!(class.name, "Fleet.Ship");
        assert_eq!(class.methods.len(), 1);

        let method = &class.methods[0];
        assert_eq!(method.name, "Fleet.Ship:Speed:i,");
        assert_eq!(method.declarations.len(), 1);
        assert_eq!(method.declarations[0].kind, crate::types::TypeKind::Int);
        assert_eq!(method.rtrn_type.kind, crate::types::TypeKind::Int);
        assert_eq!(method.instructions.len(), 6);
    }

    #[test]
    fn test_pool_use_indexing() {
        let bytes = sample_library_bytes();
        let library = Library::from_buffer(&bytes, "fleet.obl").expect("loads");
        assert_eq!(library.char_string_uses.len(), 1);
        // the id load directly before the copy directive
        assert_eq!(library.char_string_uses[0], vec![(0, 0, 2)]);
    }

    #[test]
    fn test_unqualified_method_lookup() {
        let bytes = sample_library_bytes();
        let library = Library::from_buffer(&bytes, "fleet.obl").expect("loads");
        let class = &library.classes[0];
        assert_eq!(class.unqualified_method_indices("Speed"), &[0]);
        assert!(class.unqualified_method_indices("Missing").is_empty());
    }

    #[test]
    fn test_search_with_uses_fallback() {
        let bytes = sample_library_bytes();
        let mut linker = Linker::new(String::new());
        linker.add_library(Library::from_buffer(&bytes, "fleet.obl").expect("loads"));

        assert!(linker.search_class_libraries("Fleet.Ship", &[]).is_some());
        assert!(linker.search_class_libraries("Ship", &[]).is_none());
        let uses = vec!["Fleet".to_string()];
        assert!(linker.search_class_libraries("Ship", &uses).is_some());
        assert!(linker.search_enum_libraries("Rank", &uses).is_some());
    }

    #[test]
    fn test_cross_library_interning_merges_by_value() {
        // two libraries both interning "abc" at different local ids
        let first = sample_library_bytes();

        let mut second_program = IntermediateProgram::new();
        for filler in ["x", "y", "abc"] {
            second_program.char_strings.push(filler.to_string());
        }
        second_program.bundle_names.push("Dock".to_string());
        second_program.classes.push(IntermediateClass {
            id: 0,
            name: "Dock.Crane".to_string(),
            pid: -1,
            parent_name: String::new(),
            interface_ids: Vec::new(),
            interface_names: Vec::new(),
            is_interface: false,
            is_virtual: false,
            is_debug: false,
            file_name: String::new(),
            cls_space: 0,
            inst_space: 0,
            cls_entries: IntermediateDeclarations::new(),
            inst_entries: IntermediateDeclarations::new(),
            methods: vec![IntermediateMethod {
                id: 0,
                name: "Dock.Crane:Tag:".to_string(),
                rtrn_name: "n".to_string(),
                kind: 0,
                is_virtual: false,
                has_and_or: false,
                is_native: false,
                is_function: false,
                space: 0,
                num_params: 0,
                entries: IntermediateDeclarations::new(),
                instructions: vec![
                    Instruction::int1(2, Opcode::LoadIntLit, 3),
                    Instruction::int1(2, Opcode::NewCharAry, 1),
                    Instruction::int1(2, Opcode::LoadIntLit, 2),
                    Instruction::int1(2, Opcode::LoadIntLit, Trap::CpyCharStrAry.into()),
                    Instruction::int1(2, Opcode::TrapRtrn, 3),
                    Instruction::new(3, Opcode::Rtrn),
                ],
                is_lib: true,
            }],
            is_lib: true,
        });
        let mut second = Vec::new();
        second_program.write(true, false, false, &mut second);

        let mut linker = Linker::new(String::new());
        linker.add_library(Library::from_buffer(&first, "fleet.obl").expect("loads"));
        linker.add_library(Library::from_buffer(&second, "dock.obl").expect("loads"));

        let mut char_pool = Vec::new();
        let mut int_pool = Vec::new();
        let mut float_pool = Vec::new();
        linker.resolve_external_method_calls(&mut char_pool, &mut int_pool, &mut float_pool);

        // "abc" appears once in the merged pool
        assert_eq!(char_pool.iter().filter(|value| *value == "abc").count(), 1);
        let merged_abc = char_pool.iter().position(|value| value == "abc").unwrap() as i32;

        // both referencing instructions now carry the merged id
        let first_ref = &linker.libraries[0].classes[0].methods[0].instructions[2];
        let second_ref = &linker.libraries[1].classes[0].methods[0].instructions[2];
        assert_eq!(first_ref.operand, merged_abc);
        assert_eq!(second_ref.operand, merged_abc);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = sample_library_bytes();
        bytes[4] = b'x';
        assert!(Library::from_buffer(&bytes, "fleet.obl").is_err());
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut bytes = sample_library_bytes();
        bytes[0] = 0xEE;
        let err = Library::from_buffer(&bytes, "fleet.obl").unwrap_err();
        assert!(err.message.contains("version"));
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let bytes = sample_library_bytes();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(Library::from_buffer(truncated, "fleet.obl").is_err());
    }
}
