//! Opcode definitions for the SCOM instruction set.
//!
//! An instruction is one opcode word followed by a fixed number of
//! argument words. Each argument is declared as a register index, a plain
//! literal, or a value that may also be a fixed-up reference.

use crate::error::DecodeError;

/// Number of registers in the register file.
pub const NUM_REGISTERS: usize = 8;

/// Register indices.
pub mod reg {
    /// Unused register slot.
    pub const NULL: usize = 0;
    /// Stack pointer.
    pub const SP: usize = 1;
    /// Memory address register.
    pub const MAR: usize = 2;
    /// Accumulator; holds call results.
    pub const AX: usize = 3;
    /// General purpose.
    pub const BX: usize = 4;
    /// General purpose.
    pub const CX: usize = 5;
    /// Object pointer for method calls.
    pub const OP: usize = 6;
    /// General purpose.
    pub const DX: usize = 7;

    /// Register names, indexed by register number.
    pub const NAMES: [&str; super::NUM_REGISTERS] =
        ["null", "sp", "mar", "ax", "bx", "cx", "op", "dx"];
}

/// What an argument word is expected to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// A register index; must be a literal below [`NUM_REGISTERS`].
    Reg,
    /// An integer literal; must not carry a fixup.
    Lit,
    /// An integer literal or any fixed-up reference.
    Any,
}

/// Identifies the operation to perform.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// reg += lit (pointer offset when reg is a pointer; allocates when reg is SP).
    Add = 1,
    /// reg -= lit (frees stack when reg is SP).
    Sub = 2,
    /// reg2 = reg1.
    RegToReg = 3,
    /// Write a literal of `size` bytes at MAR.
    WriteLit = 4,
    /// Return from the current function.
    Ret = 5,
    /// reg = value.
    LitToReg = 6,
    /// reg = 4 bytes at MAR.
    MemRead = 7,
    /// 4 bytes at MAR = reg.
    MemWrite = 8,
    /// reg1 *= reg2.
    MulReg = 9,
    /// reg1 /= reg2.
    DivReg = 10,
    /// reg1 += reg2.
    AddReg = 11,
    /// reg1 -= reg2.
    SubReg = 12,
    /// reg1 &= reg2.
    BitAnd = 13,
    /// reg1 |= reg2.
    BitOr = 14,
    /// reg1 = (reg1 == reg2).
    IsEqual = 15,
    /// reg1 = (reg1 != reg2).
    NotEqual = 16,
    /// reg1 = (reg1 > reg2).
    Greater = 17,
    /// reg1 = (reg1 < reg2).
    LessThan = 18,
    /// reg1 = (reg1 >= reg2).
    Gte = 19,
    /// reg1 = (reg1 <= reg2).
    Lte = 20,
    /// reg1 = (reg1 && reg2).
    And = 21,
    /// reg1 = (reg1 || reg2).
    Or = 22,
    /// Call the local function at reg.
    Call = 23,
    /// reg = 1 byte at MAR.
    MemReadB = 24,
    /// reg = 2 bytes at MAR.
    MemReadW = 25,
    /// 1 byte at MAR = reg.
    MemWriteB = 26,
    /// 2 bytes at MAR = reg.
    MemWriteW = 27,
    /// Jump by lit if AX is zero.
    Jz = 28,
    /// Push reg onto the operand stack.
    PushReg = 29,
    /// Pop the operand stack into reg.
    PopReg = 30,
    /// Jump by lit.
    Jmp = 31,
    /// reg *= lit.
    Mul = 32,
    /// Call the external function at reg.
    CallExt = 33,
    /// Stage reg on the external parameter stack.
    PushReal = 34,
    /// Drop lit staged external parameters.
    SubRealStack = 35,
    /// Record the current source line.
    LineNum = 36,
    /// Call the script function at reg in its owning instance.
    CallAs = 37,
    /// Set the compile-time base of the current function.
    ThisBase = 38,
    /// Set the argument count for the next external call.
    NumFuncArgs = 39,
    /// reg1 %= reg2.
    ModReg = 40,
    /// reg1 ^= reg2.
    XorReg = 41,
    /// reg = !reg.
    NotReg = 42,
    /// reg1 <<= reg2.
    ShiftLeft = 43,
    /// reg1 >>= reg2.
    ShiftRight = 44,
    /// Mark the next external call as a method call on reg.
    CallObj = 45,
    /// Fault unless 0 <= reg < lit.
    CheckBounds = 46,
    /// Store the object handle in reg at MAR, adjusting reference counts.
    MemWritePtr = 47,
    /// reg = object handle at MAR.
    MemReadPtr = 48,
    /// Release the object handle at MAR and clear it.
    MemZeroPtr = 49,
    /// Store the object handle in reg at MAR without releasing the old one.
    MemInitPtr = 50,
    /// MAR = SP - lit.
    LoadSpOffs = 51,
    /// Fault if MAR is null.
    CheckNull = 52,
    /// reg += lit (float).
    FAdd = 53,
    /// reg -= lit (float).
    FSub = 54,
    /// reg1 *= reg2 (float).
    FMulReg = 55,
    /// reg1 /= reg2 (float).
    FDivReg = 56,
    /// reg1 += reg2 (float).
    FAddReg = 57,
    /// reg1 -= reg2 (float).
    FSubReg = 58,
    /// reg1 = (reg1 > reg2) (float).
    FGreater = 59,
    /// reg1 = (reg1 < reg2) (float).
    FLessThan = 60,
    /// reg1 = (reg1 >= reg2) (float).
    FGte = 61,
    /// reg1 = (reg1 <= reg2) (float).
    FLte = 62,
    /// Zero lit bytes at MAR.
    ZeroMemory = 63,
    /// reg = new managed string copied from the buffer reg points at.
    CreateString = 64,
    /// reg1 = (string reg1 == string reg2).
    StringsEqual = 65,
    /// reg1 = (string reg1 != string reg2).
    StringsNotEq = 66,
    /// Fault if reg is null.
    CheckNullReg = 67,
    /// Disable the loop guard for the current function.
    LoopCheckOff = 68,
    /// Clear the object handle at MAR, releasing without disposing.
    MemZeroPtrNd = 69,
    /// Jump by lit if AX is non-zero.
    Jnz = 70,
    /// Fault unless reg is a valid byte offset into the array at MAR.
    DynamicBounds = 71,
    /// reg = new array of reg elements of size lit1; lit2 != 0 for managed elements.
    NewArray = 72,
    /// reg = new user object of lit bytes.
    NewUserObject = 73,
}

/// All valid opcodes, in numeric order.
pub const ALL_OPCODES: [Opcode; 73] = [
    Opcode::Add,
    Opcode::Sub,
    Opcode::RegToReg,
    Opcode::WriteLit,
    Opcode::Ret,
    Opcode::LitToReg,
    Opcode::MemRead,
    Opcode::MemWrite,
    Opcode::MulReg,
    Opcode::DivReg,
    Opcode::AddReg,
    Opcode::SubReg,
    Opcode::BitAnd,
    Opcode::BitOr,
    Opcode::IsEqual,
    Opcode::NotEqual,
    Opcode::Greater,
    Opcode::LessThan,
    Opcode::Gte,
    Opcode::Lte,
    Opcode::And,
    Opcode::Or,
    Opcode::Call,
    Opcode::MemReadB,
    Opcode::MemReadW,
    Opcode::MemWriteB,
    Opcode::MemWriteW,
    Opcode::Jz,
    Opcode::PushReg,
    Opcode::PopReg,
    Opcode::Jmp,
    Opcode::Mul,
    Opcode::CallExt,
    Opcode::PushReal,
    Opcode::SubRealStack,
    Opcode::LineNum,
    Opcode::CallAs,
    Opcode::ThisBase,
    Opcode::NumFuncArgs,
    Opcode::ModReg,
    Opcode::XorReg,
    Opcode::NotReg,
    Opcode::ShiftLeft,
    Opcode::ShiftRight,
    Opcode::CallObj,
    Opcode::CheckBounds,
    Opcode::MemWritePtr,
    Opcode::MemReadPtr,
    Opcode::MemZeroPtr,
    Opcode::MemInitPtr,
    Opcode::LoadSpOffs,
    Opcode::CheckNull,
    Opcode::FAdd,
    Opcode::FSub,
    Opcode::FMulReg,
    Opcode::FDivReg,
    Opcode::FAddReg,
    Opcode::FSubReg,
    Opcode::FGreater,
    Opcode::FLessThan,
    Opcode::FGte,
    Opcode::FLte,
    Opcode::ZeroMemory,
    Opcode::CreateString,
    Opcode::StringsEqual,
    Opcode::StringsNotEq,
    Opcode::CheckNullReg,
    Opcode::LoopCheckOff,
    Opcode::MemZeroPtrNd,
    Opcode::Jnz,
    Opcode::DynamicBounds,
    Opcode::NewArray,
    Opcode::NewUserObject,
];

impl TryFrom<i32> for Opcode {
    type Error = i32;

    /// Returns the offending word on failure; callers attach the position.
    fn try_from(value: i32) -> Result<Self, Self::Error> {
        if (1..=ALL_OPCODES.len() as i32).contains(&value) {
            Ok(ALL_OPCODES[(value - 1) as usize])
        } else {
            Err(value)
        }
    }
}

impl Opcode {
    /// Decode the opcode word at `at`.
    pub fn decode(word: i32, at: usize) -> Result<Self, DecodeError> {
        Opcode::try_from(word).map_err(|opcode| DecodeError::UnknownOpcode { at, opcode })
    }

    /// Returns the assembly mnemonic for this opcode.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::RegToReg => "REGTOREG",
            Opcode::WriteLit => "WRITELIT",
            Opcode::Ret => "RET",
            Opcode::LitToReg => "LITTOREG",
            Opcode::MemRead => "MEMREAD",
            Opcode::MemWrite => "MEMWRITE",
            Opcode::MulReg => "MULREG",
            Opcode::DivReg => "DIVREG",
            Opcode::AddReg => "ADDREG",
            Opcode::SubReg => "SUBREG",
            Opcode::BitAnd => "BITAND",
            Opcode::BitOr => "BITOR",
            Opcode::IsEqual => "ISEQUAL",
            Opcode::NotEqual => "NOTEQUAL",
            Opcode::Greater => "GREATER",
            Opcode::LessThan => "LESSTHAN",
            Opcode::Gte => "GTE",
            Opcode::Lte => "LTE",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Call => "CALL",
            Opcode::MemReadB => "MEMREADB",
            Opcode::MemReadW => "MEMREADW",
            Opcode::MemWriteB => "MEMWRITEB",
            Opcode::MemWriteW => "MEMWRITEW",
            Opcode::Jz => "JZ",
            Opcode::PushReg => "PUSHREG",
            Opcode::PopReg => "POPREG",
            Opcode::Jmp => "JMP",
            Opcode::Mul => "MUL",
            Opcode::CallExt => "CALLEXT",
            Opcode::PushReal => "PUSHREAL",
            Opcode::SubRealStack => "SUBREALSTACK",
            Opcode::LineNum => "LINENUM",
            Opcode::CallAs => "CALLAS",
            Opcode::ThisBase => "THISBASE",
            Opcode::NumFuncArgs => "NUMFUNCARGS",
            Opcode::ModReg => "MODREG",
            Opcode::XorReg => "XORREG",
            Opcode::NotReg => "NOTREG",
            Opcode::ShiftLeft => "SHIFTLEFT",
            Opcode::ShiftRight => "SHIFTRIGHT",
            Opcode::CallObj => "CALLOBJ",
            Opcode::CheckBounds => "CHECKBOUNDS",
            Opcode::MemWritePtr => "MEMWRITEPTR",
            Opcode::MemReadPtr => "MEMREADPTR",
            Opcode::MemZeroPtr => "MEMZEROPTR",
            Opcode::MemInitPtr => "MEMINITPTR",
            Opcode::LoadSpOffs => "LOADSPOFFS",
            Opcode::CheckNull => "CHECKNULL",
            Opcode::FAdd => "FADD",
            Opcode::FSub => "FSUB",
            Opcode::FMulReg => "FMULREG",
            Opcode::FDivReg => "FDIVREG",
            Opcode::FAddReg => "FADDREG",
            Opcode::FSubReg => "FSUBREG",
            Opcode::FGreater => "FGREATER",
            Opcode::FLessThan => "FLESSTHAN",
            Opcode::FGte => "FGTE",
            Opcode::FLte => "FLTE",
            Opcode::ZeroMemory => "ZEROMEMORY",
            Opcode::CreateString => "CREATESTRING",
            Opcode::StringsEqual => "STRINGSEQUAL",
            Opcode::StringsNotEq => "STRINGSNOTEQ",
            Opcode::CheckNullReg => "CHECKNULLREG",
            Opcode::LoopCheckOff => "LOOPCHECKOFF",
            Opcode::MemZeroPtrNd => "MEMZEROPTRND",
            Opcode::Jnz => "JNZ",
            Opcode::DynamicBounds => "DYNAMICBOUNDS",
            Opcode::NewArray => "NEWARRAY",
            Opcode::NewUserObject => "NEWUSEROBJECT",
        }
    }

    /// Declared argument kinds, in order. The length is the arity.
    pub fn args(&self) -> &'static [ArgKind] {
        use ArgKind::*;
        match self {
            Opcode::Ret
            | Opcode::MemZeroPtr
            | Opcode::CheckNull
            | Opcode::LoopCheckOff
            | Opcode::MemZeroPtrNd => &[],

            Opcode::MemRead
            | Opcode::MemWrite
            | Opcode::Call
            | Opcode::MemReadB
            | Opcode::MemReadW
            | Opcode::MemWriteB
            | Opcode::MemWriteW
            | Opcode::PushReg
            | Opcode::PopReg
            | Opcode::CallExt
            | Opcode::PushReal
            | Opcode::CallAs
            | Opcode::NotReg
            | Opcode::CallObj
            | Opcode::MemWritePtr
            | Opcode::MemReadPtr
            | Opcode::MemInitPtr
            | Opcode::CreateString
            | Opcode::CheckNullReg
            | Opcode::DynamicBounds => &[Reg],

            Opcode::Jz
            | Opcode::Jmp
            | Opcode::SubRealStack
            | Opcode::LineNum
            | Opcode::ThisBase
            | Opcode::NumFuncArgs
            | Opcode::LoadSpOffs
            | Opcode::ZeroMemory
            | Opcode::Jnz => &[Lit],

            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::CheckBounds
            | Opcode::FAdd
            | Opcode::FSub
            | Opcode::NewUserObject => &[Reg, Lit],

            Opcode::LitToReg => &[Reg, Any],
            Opcode::WriteLit => &[Lit, Any],

            Opcode::RegToReg
            | Opcode::MulReg
            | Opcode::DivReg
            | Opcode::AddReg
            | Opcode::SubReg
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::IsEqual
            | Opcode::NotEqual
            | Opcode::Greater
            | Opcode::LessThan
            | Opcode::Gte
            | Opcode::Lte
            | Opcode::And
            | Opcode::Or
            | Opcode::ModReg
            | Opcode::XorReg
            | Opcode::ShiftLeft
            | Opcode::ShiftRight
            | Opcode::FMulReg
            | Opcode::FDivReg
            | Opcode::FAddReg
            | Opcode::FSubReg
            | Opcode::FGreater
            | Opcode::FLessThan
            | Opcode::FGte
            | Opcode::FLte
            | Opcode::StringsEqual
            | Opcode::StringsNotEq => &[Reg, Reg],

            Opcode::NewArray => &[Reg, Lit, Lit],
        }
    }

    /// Number of argument words following the opcode word.
    pub fn arity(&self) -> usize {
        self.args().len()
    }

    /// True for relative jumps.
    pub fn is_jump(&self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Jz | Opcode::Jnz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_opcodes_count() {
        assert_eq!(ALL_OPCODES.len(), 73);
    }

    #[test]
    fn numbering_matches_table_order() {
        for (i, &opcode) in ALL_OPCODES.iter().enumerate() {
            assert_eq!(opcode as i32, i as i32 + 1, "{opcode:?}");
        }
    }

    #[test]
    fn roundtrip_all_valid_opcodes() {
        for &opcode in &ALL_OPCODES {
            assert_eq!(Opcode::try_from(opcode as i32), Ok(opcode));
        }
    }

    #[test]
    fn out_of_range_words_rejected() {
        for word in [0, -1, 74, 1000, i32::MIN, i32::MAX] {
            assert_eq!(
                Opcode::decode(word, 9),
                Err(DecodeError::UnknownOpcode { at: 9, opcode: word })
            );
        }
    }

    #[test]
    fn mnemonics_unique_and_uppercase() {
        let mut seen = std::collections::HashSet::new();
        for &opcode in &ALL_OPCODES {
            let m = opcode.mnemonic();
            assert_eq!(m, m.to_uppercase(), "mnemonic should be uppercase: {m}");
            assert!(seen.insert(m), "duplicate mnemonic {m}");
        }
    }

    #[test]
    fn arities() {
        assert_eq!(Opcode::Ret.arity(), 0);
        assert_eq!(Opcode::PushReg.arity(), 1);
        assert_eq!(Opcode::LitToReg.arity(), 2);
        assert_eq!(Opcode::NewArray.arity(), 3);
    }

    #[test]
    fn only_value_slots_accept_references() {
        for &opcode in &ALL_OPCODES {
            let any_count = opcode.args().iter().filter(|&&k| k == ArgKind::Any).count();
            let expected = matches!(opcode, Opcode::LitToReg | Opcode::WriteLit) as usize;
            assert_eq!(any_count, expected, "{opcode:?}");
        }
    }

    #[test]
    fn register_names() {
        assert_eq!(reg::NAMES[reg::AX], "ax");
        assert_eq!(reg::NAMES[reg::SP], "sp");
        assert_eq!(reg::NAMES[reg::MAR], "mar");
    }
}
