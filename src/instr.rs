//! Stack-VM instruction set and the intermediate instruction record.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Fixed maximum number of bytes a single method's locals may occupy.
pub const LOCAL_SIZE: i32 = 192;

/// Memory context an instruction's variable operand resolves against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum MemCtx {
    Local = 0,
    Instance = 1,
    Class = 2,
}

/// Bytecode operations. The byte value is the serialized opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    // loads and stores
    LoadIntLit = 0,
    LoadCharLit,
    LoadFloatLit,
    LoadIntVar,
    LoadFloatVar,
    LoadFuncVar,
    StorIntVar,
    StorFloatVar,
    StorFuncVar,
    CopyIntVar,
    CopyFloatVar,
    CopyFuncVar,
    LoadByteAryElm,
    LoadCharAryElm,
    LoadIntAryElm,
    LoadFloatAryElm,
    StorByteAryElm,
    StorCharAryElm,
    StorIntAryElm,
    StorFloatAryElm,
    LoadClsMem,
    LoadInstMem,
    LoadArySize,

    // integer math
    AndInt,
    OrInt,
    AddInt,
    SubInt,
    MulInt,
    DivInt,
    ModInt,
    BitAndInt,
    BitOrInt,
    BitXorInt,
    ShlInt,
    ShrInt,
    EqlInt,
    NeqlInt,
    LesInt,
    GtrInt,
    LesEqlInt,
    GtrEqlInt,

    // float math
    AddFloat,
    SubFloat,
    MulFloat,
    DivFloat,
    EqlFloat,
    NeqlFloat,
    LesFloat,
    GtrFloat,
    LesEqlFloat,
    GtrEqlFloat,
    FlorFloat,
    CeilFloat,
    SqrtFloat,
    RandFloat,

    // conversions and stack management
    I2f,
    F2i,
    SwapInt,
    PopInt,
    PopFloat,

    // allocation
    NewByteAry,
    NewCharAry,
    NewIntAry,
    NewFloatAry,
    NewObjInst,

    // casts and type checks
    ObjInstCast,
    ObjTypeOf,

    // dispatch
    MthdCall,
    DynMthdCall,
    AsyncMthdCall,
    Rtrn,

    // symbolic cross-library forms, resolved at final link
    LibNewObjInst,
    LibObjInstCast,
    LibMthdCall,
    LibFuncDef,

    // traps into the runtime
    Trap,
    TrapRtrn,

    // concurrency
    CriticalStart,
    CriticalEnd,
    ThreadJoin,
    ThreadSleep,
    ThreadMutex,

    // control flow
    Jmp,
    Lbl,

    /// Sentinel terminating a method's instruction stream.
    EndStmts,
}

/// Declaration-table parameter kinds; values follow the VM's parameter-type
/// set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum ParamKind {
    Char = -1500,
    Int = -1499,
    Float = -1498,
    ByteAry = -1497,
    CharAry = -1496,
    IntAry = -1495,
    FloatAry = -1494,
    Obj = -1493,
    ObjAry = -1492,
    Func = -1491,
}

/// Return-kind tags for dynamic method calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum ReturnKind {
    Nil = -1000,
    Int = -999,
    Float = -998,
    Func = -997,
}

/// System directive codes emitted as trap operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum Trap {
    CpyCharStrAry = -4000,
    CpyCharStrArys = -3999,
    CpyIntStrAry = -3998,
    CpyFloatStrAry = -3997,
    StdOutBool = -3996,
    StdOutByte = -3995,
    StdOutChar = -3994,
    StdOutInt = -3993,
    StdOutFloat = -3992,
    StdOutCharAry = -3991,
    StdInString = -3990,
    LoadArySize = -3989,
    LoadInstUid = -3988,
    SysTime = -3987,
    Exit = -3986,
}

impl Trap {
    /// Directive name accepted in system-bundle source.
    pub fn from_directive(name: &str) -> Option<Trap> {
        let trap = match name {
            "CPY_CHAR_STR_ARY" => Trap::CpyCharStrAry,
            "CPY_CHAR_STR_ARYS" => Trap::CpyCharStrArys,
            "CPY_INT_STR_ARY" => Trap::CpyIntStrAry,
            "CPY_FLOAT_STR_ARY" => Trap::CpyFloatStrAry,
            "STD_OUT_BOOL" => Trap::StdOutBool,
            "STD_OUT_BYTE" => Trap::StdOutByte,
            "STD_OUT_CHAR" => Trap::StdOutChar,
            "STD_OUT_INT" => Trap::StdOutInt,
            "STD_OUT_FLOAT" => Trap::StdOutFloat,
            "STD_OUT_CHAR_ARY" => Trap::StdOutCharAry,
            "STD_IN_STRING" => Trap::StdInString,
            "LOAD_ARY_SIZE" => Trap::LoadArySize,
            "LOAD_INST_UID" => Trap::LoadInstUid,
            "SYS_TIME" => Trap::SysTime,
            "EXIT" => Trap::Exit,
            _ => return None,
        };
        Some(trap)
    }
}

/// One instruction: opcode plus up to six operands. String operands carry
/// cross-library class/method names until final id resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub op: Opcode,
    pub line: u32,
    pub operand: i32,
    pub operand2: i32,
    pub operand3: i32,
    pub operand4: f64,
    pub operand5: String,
    pub operand6: String,
}

impl Instruction {
    pub fn new(line: u32, op: Opcode) -> Self {
        Self {
            op,
            line,
            operand: 0,
            operand2: 0,
            operand3: 0,
            operand4: 0.0,
            operand5: String::new(),
            operand6: String::new(),
        }
    }

    pub fn int1(line: u32, op: Opcode, operand: i32) -> Self {
        let mut instr = Self::new(line, op);
        instr.operand = operand;
        instr
    }

    pub fn int2(line: u32, op: Opcode, operand: i32, operand2: i32) -> Self {
        let mut instr = Self::int1(line, op, operand);
        instr.operand2 = operand2;
        instr
    }

    pub fn int3(line: u32, op: Opcode, operand: i32, operand2: i32, operand3: i32) -> Self {
        let mut instr = Self::int2(line, op, operand, operand2);
        instr.operand3 = operand3;
        instr
    }

    pub fn float(line: u32, op: Opcode, operand4: f64) -> Self {
        let mut instr = Self::new(line, op);
        instr.operand4 = operand4;
        instr
    }

    pub fn text(line: u32, op: Opcode, operand5: String) -> Self {
        let mut instr = Self::new(line, op);
        instr.operand5 = operand5;
        instr
    }

    pub fn lib_call(line: u32, op: Opcode, operand3: i32, operand5: String, operand6: String) -> Self {
        let mut instr = Self::new(line, op);
        instr.operand3 = operand3;
        instr.operand5 = operand5;
        instr.operand6 = operand6;
        instr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_round_trip() {
        for op in [
            Opcode::LoadIntLit,
            Opcode::MthdCall,
            Opcode::LibMthdCall,
            Opcode::Rtrn,
            Opcode::EndStmts,
        ] {
            let byte: u8 = op.into();
            assert_eq!(Opcode::try_from(byte), Ok(op));
        }
    }

    #[test]
    fn test_param_kind_values_follow_vm_set() {
        assert_eq!(i32::from(ParamKind::Char), -1500);
        assert_eq!(i32::from(ParamKind::Func), -1491);
        assert_eq!(ParamKind::try_from(-1493), Ok(ParamKind::Obj));
    }

    #[test]
    fn test_trap_directive_names() {
        assert_eq!(Trap::from_directive("STD_OUT_INT"), Some(Trap::StdOutInt));
        assert_eq!(Trap::from_directive("NOT_A_TRAP"), None);
    }

    #[test]
    fn test_instruction_builders() {
        let jmp = Instruction::int2(4, Opcode::Jmp, 7, -1);
        assert_eq!(jmp.operand, 7);
        assert_eq!(jmp.operand2, -1);

        let call = Instruction::lib_call(
            9,
            Opcode::LibMthdCall,
            0,
            "System.String".to_string(),
            "System.String:Append:c,".to_string(),
        );
        assert_eq!(call.operand5, "System.String");
        assert!(call.operand6.ends_with("c,"));
    }
}
