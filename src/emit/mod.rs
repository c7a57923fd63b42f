//! The intermediate emitter: lowers the analyzed tree to stack-VM
//! instructions and lays out the class/method tables of the intermediate
//! program.

mod expr;
mod stmt;
#[cfg(test)]
mod tests;

use crate::analyze::TargetKind;
use crate::ast::*;
use crate::diagnostic::FatalError;
use crate::instr::{Instruction, MemCtx, Opcode, ParamKind, LOCAL_SIZE};
use crate::intermediate::{
    IntermediateClass, IntermediateDeclarations, IntermediateEnum, IntermediateEnumItem,
    IntermediateMethod, IntermediateProgram,
};
use crate::linker::{LibClassId, Linker};
use crate::sym::EntryId;
use crate::types::{Type, TypeKind};

pub struct Emitter {
    pub program: Program,
    pub linker: Linker,
    target: TargetKind,
    is_debug: bool,
    imm: IntermediateProgram,
    pub(crate) block: Vec<Instruction>,
    /// One counter feeds both label kinds so ids never collide.
    label_counter: i32,
    pub(crate) break_labels: Vec<i32>,
    pub(crate) cur_line: u32,
    pub(crate) new_char_str_count: i32,
    pub(crate) is_str_array: bool,
    pub(crate) is_new_inst: bool,
    pub(crate) current_class: Option<ClassId>,
    pub(crate) current_method: Option<MethodId>,
    string_cls_id: i32,
    pub(crate) string_cls: Option<LibClassId>,
    pub(crate) string_cls_program: Option<ClassId>,
}

impl Emitter {
    pub fn new(program: Program, linker: Linker, target: TargetKind, is_debug: bool) -> Self {
        Self {
            program,
            linker,
            target,
            is_debug,
            imm: IntermediateProgram::new(),
            block: Vec::new(),
            label_counter: 0,
            break_labels: Vec::new(),
            cur_line: 0,
            new_char_str_count: 0,
            is_str_array: false,
            is_new_inst: false,
            current_class: None,
            current_method: None,
            string_cls_id: -1,
            string_cls: None,
            string_cls_program: None,
        }
    }

    pub(crate) fn is_lib(&self) -> bool {
        self.target == TargetKind::Library
    }

    /// Lowers the whole program. Library classes are numbered first, pruned
    /// to the referenced set unless building a library.
    pub fn translate(mut self) -> Result<IntermediateProgram, FatalError> {
        self.linker.resolve_external_classes();

        let mut class_id = 0;
        let keep_all = self.is_lib();
        for lib_class_id in self.linker.all_class_ids() {
            let class = self.linker.class(lib_class_id);
            if self.string_cls_id < 0 && class.name == STRING_CLASS_NAME {
                self.string_cls = Some(lib_class_id);
                self.string_cls_id = class_id;
            }
            if keep_all || class.was_called {
                self.linker.class_mut(lib_class_id).id = class_id;
                class_id += 1;
            }
        }
        // referenced interfaces resolve to their assigned ids
        for lib_class_id in self.linker.all_class_ids() {
            let names = self.linker.class(lib_class_id).interface_names.clone();
            let ids: Vec<i32> = names
                .iter()
                .filter_map(|name| {
                    self.linker
                        .search_class_libraries(name, &self.program.uses)
                        .map(|id| self.linker.class(id).id)
                })
                .collect();
            self.linker.class_mut(lib_class_id).interface_ids = ids;
        }

        for bundle in 0..self.program.bundles.len() {
            for class in self.program.bundles[bundle].classes.clone() {
                self.program.class_mut(class).id = class_id;
                class_id += 1;
            }
        }

        // compiling the system bundle boxes strings with its own class
        if self.string_cls_id < 0 {
            if let Some(class) = self.program.search_classes(STRING_CLASS_NAME) {
                self.string_cls_program = Some(class);
                self.string_cls_id = self.program.class(class).id;
            }
        }

        self.emit_strings();
        self.emit_libraries();
        self.emit_bundles()?;

        self.imm.string_cls_id = self.string_cls_id;
        if let Some((class, method)) = self.program.start {
            self.imm.start_class_id = self.program.class(class).id;
            self.imm.start_method_id = self.program.method(method).id;
        }

        debug_assert!(self.break_labels.is_empty());
        Ok(self.imm)
    }

    /// Merges library literal pools into the program pools, rewriting
    /// library pool references, then installs the final pools.
    fn emit_strings(&mut self) {
        let mut char_strings = self.program.char_strings.clone();
        let mut int_strings = self.program.int_strings.clone();
        let mut float_strings = self.program.float_strings.clone();

        if !self.is_lib() {
            self.linker.resolve_external_method_calls(
                &mut char_strings,
                &mut int_strings,
                &mut float_strings,
            );
        }

        self.imm.char_strings = char_strings;
        self.imm.int_strings = int_strings;
        self.imm.float_strings = float_strings;
    }

    /// Clones referenced library enums and classes into the intermediate
    /// program, resolving symbolic call sites to assigned ids.
    fn emit_libraries(&mut self) {
        if self.is_lib() {
            return;
        }
        for enum_id in self.linker.all_enum_ids() {
            let eenum = self.linker.enum_(enum_id);
            self.imm.enums.push(IntermediateEnum {
                name: eenum.name.clone(),
                offset: eenum.offset,
                items: eenum
                    .items
                    .iter()
                    .map(|item| IntermediateEnumItem {
                        name: item.name.clone(),
                        id: item.id,
                    })
                    .collect(),
            });
        }
        for lib_class_id in self.linker.all_class_ids() {
            if self.linker.class(lib_class_id).was_called {
                let class = self.convert_library_class(lib_class_id);
                self.imm.classes.push(class);
            }
        }
    }

    fn convert_library_class(&self, lib_class_id: LibClassId) -> IntermediateClass {
        let class = self.linker.class(lib_class_id);
        let pid = if class.parent_name.is_empty() {
            -1
        } else {
            self.linker
                .search_class_libraries(&class.parent_name, &[])
                .map(|parent| self.linker.class(parent).id)
                .unwrap_or(-1)
        };

        let methods = class
            .methods
            .iter()
            .map(|method| {
                let mut instructions = Vec::new();
                for instr in &method.instructions {
                    self.convert_library_instruction(instr, &mut instructions);
                }
                IntermediateMethod {
                    id: method.id,
                    name: method.name.clone(),
                    rtrn_name: method.rtrn_name.clone(),
                    kind: method.kind,
                    is_virtual: method.is_virtual,
                    has_and_or: method.has_and_or,
                    is_native: method.is_native,
                    is_function: method.is_function,
                    space: method.space,
                    num_params: method.num_params,
                    entries: method.entries.clone(),
                    instructions,
                    is_lib: true,
                }
            })
            .collect();

        IntermediateClass {
            id: class.id,
            name: class.name.clone(),
            pid,
            parent_name: class.parent_name.clone(),
            interface_ids: class.interface_ids.clone(),
            interface_names: class.interface_names.clone(),
            is_interface: class.is_interface,
            is_virtual: class.is_virtual,
            is_debug: class.is_debug,
            file_name: class.file_name.clone(),
            cls_space: class.cls_space,
            inst_space: class.inst_space,
            cls_entries: class.cls_entries.clone(),
            inst_entries: class.inst_entries.clone(),
            methods,
            is_lib: true,
        }
    }

    /// Symbolic cross-library forms become id-resolved instructions in an
    /// executable.
    fn convert_library_instruction(&self, instr: &Instruction, out: &mut Vec<Instruction>) {
        match instr.op {
            Opcode::LibMthdCall => {
                if let Some((class_id, method_id)) =
                    self.lookup_lib_target(&instr.operand5, &instr.operand6)
                {
                    out.push(Instruction::int3(
                        instr.line,
                        Opcode::MthdCall,
                        class_id,
                        method_id,
                        instr.operand3,
                    ));
                    return;
                }
            }
            Opcode::LibFuncDef => {
                if let Some((class_id, method_id)) =
                    self.lookup_lib_target(&instr.operand5, &instr.operand6)
                {
                    out.push(Instruction::int1(instr.line, Opcode::LoadIntLit, method_id));
                    out.push(Instruction::int1(instr.line, Opcode::LoadIntLit, class_id));
                    return;
                }
            }
            Opcode::LibNewObjInst => {
                if let Some(class) = self.linker.search_class_libraries(&instr.operand5, &[]) {
                    out.push(Instruction::int1(
                        instr.line,
                        Opcode::NewObjInst,
                        self.linker.class(class).id,
                    ));
                    return;
                }
            }
            Opcode::LibObjInstCast => {
                if let Some(class) = self.linker.search_class_libraries(&instr.operand5, &[]) {
                    out.push(Instruction::int1(
                        instr.line,
                        Opcode::ObjInstCast,
                        self.linker.class(class).id,
                    ));
                    return;
                }
            }
            _ => {}
        }
        out.push(instr.clone());
    }

    fn lookup_lib_target(&self, class_name: &str, method_name: &str) -> Option<(i32, i32)> {
        let class = self.linker.search_class_libraries(class_name, &[])?;
        let method = self.linker.find_method(class, method_name)?;
        Some((self.linker.class(class).id, self.linker.method(method).id))
    }

    // ----- program emission -----

    fn emit_bundles(&mut self) -> Result<(), FatalError> {
        let mut bundle_names = Vec::new();
        for bundle in 0..self.program.bundles.len() {
            bundle_names.push(self.program.bundles[bundle].name.clone());
            for enum_id in self.program.bundles[bundle].enums.clone() {
                let eenum = self.program.enum_(enum_id);
                self.imm.enums.push(IntermediateEnum {
                    name: eenum.name.clone(),
                    offset: eenum.offset,
                    items: eenum
                        .items
                        .iter()
                        .map(|item| IntermediateEnumItem {
                            name: item.name.clone(),
                            id: item.id,
                        })
                        .collect(),
                });
            }
            for class_id in self.program.bundles[bundle].classes.clone() {
                if self.is_lib() || self.program.class(class_id).called {
                    let class = self.emit_class(class_id)?;
                    self.imm.classes.push(class);
                }
            }
        }
        self.imm.bundle_names = bundle_names;
        Ok(())
    }

    fn emit_class(&mut self, class_id: ClassId) -> Result<IntermediateClass, FatalError> {
        self.current_class = Some(class_id);
        self.current_method = None;
        self.cur_line = self.program.class(class_id).span.line;

        let mut cls_entries = IntermediateDeclarations::new();
        let cls_space = self.calculate_class_space(class_id, true, &mut cls_entries);
        let mut inst_entries = IntermediateDeclarations::new();
        let inst_space = self.calculate_class_space(class_id, false, &mut inst_entries);

        let class = self.program.class(class_id);
        let (pid, parent_name) = match (class.parent, class.lib_parent) {
            (Some(parent), _) => {
                let parent = self.program.class(parent);
                (parent.id, parent.name.clone())
            }
            (None, Some(lib_parent)) => {
                let parent = self.linker.class(lib_parent);
                (parent.id, parent.name.clone())
            }
            _ => (-1, String::new()),
        };

        let mut interface_ids: Vec<i32> = class
            .interfaces
            .iter()
            .map(|interface| self.program.class(*interface).id)
            .collect();
        interface_ids.extend(
            class
                .lib_interfaces
                .iter()
                .map(|interface| self.linker.class(*interface).id),
        );

        let short_file_name = class
            .file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&class.file_name)
            .to_string();

        let mut imm_class = IntermediateClass {
            id: class.id,
            name: class.name.clone(),
            pid,
            parent_name,
            interface_ids,
            interface_names: class.interface_names.clone(),
            is_interface: class.is_interface(),
            is_virtual: class.is_virtual(),
            is_debug: self.is_debug,
            file_name: short_file_name,
            cls_space,
            inst_space,
            cls_entries,
            inst_entries,
            methods: Vec::new(),
            is_lib: false,
        };

        for method_id in self.program.class(class_id).methods.clone() {
            let method = self.emit_method(method_id)?;
            imm_class.methods.push(method);
        }

        self.current_class = None;
        Ok(imm_class)
    }

    fn emit_method(&mut self, method_id: MethodId) -> Result<IntermediateMethod, FatalError> {
        self.current_method = Some(method_id);
        self.cur_line = self.program.method(method_id).span.line;
        self.block = Vec::new();

        let mut entries = IntermediateDeclarations::new();
        let space = self.calculate_method_space(method_id, &mut entries);
        if space > LOCAL_SIZE {
            let method = self.program.method(method_id);
            let class = self.program.class(method.class_id);
            return Err(FatalError::new(format!(
                "{}:{}: local space has been exceeded by {} bytes",
                class.file_name,
                method.span.line,
                space - LOCAL_SIZE
            )));
        }

        // function-reference parameters occupy two slots
        let declarations = self.program.method(method_id).declarations.clone();
        let mut num_params = 0;
        for declaration in &declarations {
            let entry_id = self.declaration_entry_id(*declaration);
            if self.program.entry(entry_id).ty.kind == TypeKind::Func {
                num_params += 2;
            } else {
                num_params += 1;
            }
        }

        let is_virtual = self.program.method(method_id).is_virtual;
        if !is_virtual {
            // callers push left-to-right; restore in reverse order
            for declaration in declarations.iter().rev() {
                let entry_id = self.declaration_entry_id(*declaration);
                let entry = self.program.entry(entry_id);
                if entry.is_self {
                    continue;
                }
                let slot = entry.id;
                let op = match entry.ty.kind {
                    TypeKind::Float if entry.ty.dimension == 0 => Opcode::StorFloatVar,
                    TypeKind::Func => Opcode::StorFuncVar,
                    _ => Opcode::StorIntVar,
                };
                self.emit(Instruction::int2(self.cur_line, op, slot, MemCtx::Local.into()));
            }

            let statements = self
                .program
                .method(method_id)
                .statements
                .clone()
                .unwrap_or_default();
            for stmt in &statements {
                self.emit_statement(*stmt);
            }
            let end_return = statements
                .last()
                .map(|stmt| matches!(self.program.stmt(*stmt).kind, StmtKind::Return(_)))
                .unwrap_or(false);

            // constructors return the instance
            if self.program.method(method_id).kind.is_constructor() {
                self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
            }
            if !end_return {
                self.emit(Instruction::new(self.cur_line, Opcode::Rtrn));
            }
        }

        let method = self.program.method(method_id);
        let imm_method = IntermediateMethod {
            id: method.id,
            name: method.encoded_name.clone(),
            rtrn_name: method.encoded_return.clone(),
            kind: method.kind.as_i32(),
            is_virtual: method.is_virtual,
            has_and_or: method.has_and_or,
            is_native: method.is_native,
            is_function: method.is_static,
            space,
            num_params,
            entries,
            instructions: std::mem::take(&mut self.block),
            is_lib: false,
        };

        self.current_method = None;
        Ok(imm_method)
    }

    pub(crate) fn emit(&mut self, instr: Instruction) {
        self.block.push(instr);
    }

    pub(crate) fn declaration_entry_id(&self, stmt: StmtId) -> EntryId {
        match &self.program.stmt(stmt).kind {
            StmtKind::Declaration { entry, .. } => *entry,
            _ => unreachable!("declarations are declaration statements"),
        }
    }

    pub(crate) fn next_conditional_label(&mut self) -> i32 {
        self.label_counter += 1;
        self.label_counter
    }

    pub(crate) fn next_unconditional_label(&mut self) -> i32 {
        self.label_counter += 1;
        self.label_counter
    }

    // ----- frame and field layout -----

    /// Walks a symbol table in declaration order, assigning each entry its
    /// slot and declaration-table row. Integers and pointers take one slot;
    /// floats and function references take two.
    fn layout_entries(
        &mut self,
        entry_ids: &[EntryId],
        index: &mut i32,
        declarations: &mut IntermediateDeclarations,
        want_static: bool,
    ) -> i32 {
        let mut var_space = 0;
        for entry_id in entry_ids {
            let entry = self.program.entry(*entry_id).clone();
            if entry.is_self || entry.is_static != want_static {
                continue;
            }
            let name = entry.name.clone();
            let is_array = entry.ty.dimension > 0;
            let (kind, slots) = match entry.ty.kind {
                TypeKind::Bool => {
                    if is_array {
                        (ParamKind::IntAry, 1)
                    } else {
                        (ParamKind::Int, 1)
                    }
                }
                TypeKind::Byte => {
                    if is_array {
                        (ParamKind::ByteAry, 1)
                    } else {
                        (ParamKind::Int, 1)
                    }
                }
                TypeKind::Int => {
                    if is_array {
                        (ParamKind::IntAry, 1)
                    } else {
                        (ParamKind::Int, 1)
                    }
                }
                TypeKind::Char => {
                    if is_array {
                        (ParamKind::CharAry, 1)
                    } else {
                        (ParamKind::Char, 1)
                    }
                }
                TypeKind::Class => {
                    let is_enum = self.is_enum_type(&entry.ty);
                    match (is_array, is_enum) {
                        (true, true) => (ParamKind::IntAry, 1),
                        (true, false) => (ParamKind::ObjAry, 1),
                        (false, true) => (ParamKind::Int, 1),
                        (false, false) => (ParamKind::Obj, 1),
                    }
                }
                TypeKind::Float => {
                    if is_array {
                        (ParamKind::FloatAry, 1)
                    } else {
                        (ParamKind::Float, 2)
                    }
                }
                TypeKind::Func => (ParamKind::Func, 2),
                _ => continue,
            };
            declarations.add_parameter(name, kind);
            self.program.entry_mut(*entry_id).id = *index;
            *index += slots;
            var_space += slots;
        }
        var_space * std::mem::size_of::<i32>() as i32
    }

    pub(crate) fn is_enum_type(&self, ty: &Type) -> bool {
        self.program.search_enums(&ty.class_name).is_some()
            || self
                .linker
                .search_enum_libraries(&ty.class_name, &self.program.uses)
                .is_some()
    }

    /// Class-space or instance-space layout; parent fields occupy the
    /// leading slots.
    fn calculate_class_space(
        &mut self,
        class_id: ClassId,
        want_static: bool,
        declarations: &mut IntermediateDeclarations,
    ) -> i32 {
        let mut size = 0;
        let mut index = 0;

        let class = self.program.class(class_id);
        let (parent_ref, lib_parent_ref) = (class.parent, class.lib_parent);
        if let Some(parent) = parent_ref {
            // ancestor chain, root first
            let mut chain = Vec::new();
            let mut current = Some(parent);
            while let Some(ancestor) = current {
                chain.push(ancestor);
                current = self.program.class(ancestor).parent;
            }
            for ancestor in chain.iter().rev() {
                if let Some(entries) = self.class_table_entries(*ancestor) {
                    size += self.layout_entries(&entries, &mut index, declarations, want_static);
                }
            }
        } else if let Some(lib_parent) = lib_parent_ref {
            let parent = self.linker.class(lib_parent);
            size += if want_static {
                parent.cls_space
            } else {
                parent.inst_space
            };
            index = size / std::mem::size_of::<i32>() as i32;
        }

        if let Some(entries) = self.class_table_entries(class_id) {
            size += self.layout_entries(&entries, &mut index, declarations, want_static);
        }
        size
    }

    fn class_table_entries(&self, class_id: ClassId) -> Option<Vec<EntryId>> {
        let class = self.program.class(class_id);
        let table = self.program.bundles[class.bundle]
            .symbols
            .table_index(&class.name)?;
        Some(
            self.program.bundles[class.bundle]
                .symbols
                .table(table)
                .entries()
                .to_vec(),
        )
    }

    fn calculate_method_space(
        &mut self,
        method_id: MethodId,
        declarations: &mut IntermediateDeclarations,
    ) -> i32 {
        // the and/or lowering owns slot zero
        let mut index = if self.program.method(method_id).has_and_or {
            1
        } else {
            0
        };

        let class_id = self.program.method(method_id).class_id;
        let bundle = self.program.class(class_id).bundle;
        let table_key = self.program.method(method_id).table_key.clone();
        let entries = self.program.bundles[bundle]
            .symbols
            .table_index(&table_key)
            .map(|table| {
                self.program.bundles[bundle]
                    .symbols
                    .table(table)
                    .entries()
                    .to_vec()
            })
            .unwrap_or_default();

        self.layout_entries(&entries, &mut index, declarations, false)
    }

    // ----- shared emission helpers -----

    pub(crate) fn entry_mem_ctx(&self, entry_id: EntryId) -> MemCtx {
        let entry = self.program.entry(entry_id);
        if entry.is_local {
            MemCtx::Local
        } else if entry.is_static {
            MemCtx::Class
        } else {
            MemCtx::Instance
        }
    }

    /// Pushes the owning memory block for non-local contexts.
    pub(crate) fn emit_mem_ctx_load(&mut self, ctx: MemCtx) {
        match ctx {
            MemCtx::Instance => self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem)),
            MemCtx::Class => self.emit(Instruction::new(self.cur_line, Opcode::LoadClsMem)),
            MemCtx::Local => {}
        }
    }

    /// How many values an unused return leaves on the stack:
    /// 0 none, 1 an int slot, 2 a float, 3 a function reference.
    pub(crate) fn orphan_return(&self, call_id: ExprId) -> OrphanKind {
        let data = match &self.program.expr(call_id).kind {
            ExprKind::MethodCall(data) => data,
            _ => return OrphanKind::None,
        };
        let rtrn = if let Some(method) = data.method {
            if data.is_func_def {
                return OrphanKind::Func;
            }
            Some(self.program.method(method).return_type.clone())
        } else if let Some(lib_method) = data.lib_method {
            if data.is_func_def {
                return OrphanKind::Func;
            }
            Some(self.linker.method(lib_method).rtrn_type.clone())
        } else if data.dyn_func_entry.is_some() || data.call_type == CallType::Enum {
            self.program.expr(call_id).eval_type.clone()
        } else {
            return OrphanKind::None;
        };
        match rtrn {
            Some(ty) => match ty.kind {
                TypeKind::Nil => OrphanKind::None,
                TypeKind::Float if ty.dimension == 0 => OrphanKind::Float,
                TypeKind::Func => OrphanKind::Func,
                _ => OrphanKind::Int,
            },
            None => OrphanKind::None,
        }
    }

    pub(crate) fn emit_orphan_pops(&mut self, kind: OrphanKind) {
        match kind {
            OrphanKind::None => {}
            OrphanKind::Int => self.emit(Instruction::new(self.cur_line, Opcode::PopInt)),
            OrphanKind::Float => self.emit(Instruction::new(self.cur_line, Opcode::PopFloat)),
            OrphanKind::Func => {
                self.emit(Instruction::new(self.cur_line, Opcode::PopInt));
                self.emit(Instruction::new(self.cur_line, Opcode::PopInt));
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OrphanKind {
    None,
    Int,
    Float,
    Func,
}
