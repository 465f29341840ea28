use std::fmt;

/// The instruction set.
///
/// Constant-indexed opcodes come in a short form (1-byte operand) and a long
/// form (3-byte big-endian operand); every `*Long` discriminant is exactly
/// its short form plus one, which the emitter relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    OpConstant = 0,
    OpConstantLong = 1,
    OpNil = 2,
    OpTrue = 3,
    OpFalse = 4,
    OpEqual = 5,
    OpNotEqual = 6,
    OpGreater = 7,
    OpGreaterEqual = 8,
    OpLess = 9,
    OpLessEqual = 10,
    OpNot = 11,
    OpNegate = 12,
    OpAdd = 13,
    OpSubtract = 14,
    OpMultiply = 15,
    OpDivide = 16,
    OpPrint = 17,
    OpPop = 18,
    OpDefineGlobal = 19,
    OpDefineGlobalLong = 20,
    OpGetGlobal = 21,
    OpGetGlobalLong = 22,
    OpSetGlobal = 23,
    OpSetGlobalLong = 24,
    OpGetLocal = 25,
    OpSetLocal = 26,
    OpGetUpvalue = 27,
    OpSetUpvalue = 28,
    OpJump = 29,
    OpJumpIfFalse = 30,
    OpLoop = 31,
    OpCall = 32,
    OpClosure = 33,
    OpCloseUpvalue = 34,
    OpClass = 35,
    OpClassLong = 36,
    OpInherit = 37,
    OpMethod = 38,
    OpMethodLong = 39,
    OpGetProperty = 40,
    OpGetPropertyLong = 41,
    OpSetProperty = 42,
    OpSetPropertyLong = 43,
    OpGetSuper = 44,
    OpGetSuperLong = 45,
    OpInvoke = 46,
    OpInvokeLong = 47,
    OpSuperInvoke = 48,
    OpSuperInvokeLong = 49,
    OpReturn = 50,
}

impl OpCode {
    /// The long form of a short constant-indexed opcode.
    pub fn long_variant(self) -> OpCode {
        debug_assert!(matches!(
            self,
            OpCode::OpConstant
                | OpCode::OpDefineGlobal
                | OpCode::OpGetGlobal
                | OpCode::OpSetGlobal
                | OpCode::OpClass
                | OpCode::OpMethod
                | OpCode::OpGetProperty
                | OpCode::OpSetProperty
                | OpCode::OpGetSuper
                | OpCode::OpInvoke
                | OpCode::OpSuperInvoke
        ));
        OpCode::from(self as u8 + 1)
    }
}

impl From<u8> for OpCode {
    fn from(byte: u8) -> Self {
        match byte {
            0 => OpCode::OpConstant,
            1 => OpCode::OpConstantLong,
            2 => OpCode::OpNil,
            3 => OpCode::OpTrue,
            4 => OpCode::OpFalse,
            5 => OpCode::OpEqual,
            6 => OpCode::OpNotEqual,
            7 => OpCode::OpGreater,
            8 => OpCode::OpGreaterEqual,
            9 => OpCode::OpLess,
            10 => OpCode::OpLessEqual,
            11 => OpCode::OpNot,
            12 => OpCode::OpNegate,
            13 => OpCode::OpAdd,
            14 => OpCode::OpSubtract,
            15 => OpCode::OpMultiply,
            16 => OpCode::OpDivide,
            17 => OpCode::OpPrint,
            18 => OpCode::OpPop,
            19 => OpCode::OpDefineGlobal,
            20 => OpCode::OpDefineGlobalLong,
            21 => OpCode::OpGetGlobal,
            22 => OpCode::OpGetGlobalLong,
            23 => OpCode::OpSetGlobal,
            24 => OpCode::OpSetGlobalLong,
            25 => OpCode::OpGetLocal,
            26 => OpCode::OpSetLocal,
            27 => OpCode::OpGetUpvalue,
            28 => OpCode::OpSetUpvalue,
            29 => OpCode::OpJump,
            30 => OpCode::OpJumpIfFalse,
            31 => OpCode::OpLoop,
            32 => OpCode::OpCall,
            33 => OpCode::OpClosure,
            34 => OpCode::OpCloseUpvalue,
            35 => OpCode::OpClass,
            36 => OpCode::OpClassLong,
            37 => OpCode::OpInherit,
            38 => OpCode::OpMethod,
            39 => OpCode::OpMethodLong,
            40 => OpCode::OpGetProperty,
            41 => OpCode::OpGetPropertyLong,
            42 => OpCode::OpSetProperty,
            43 => OpCode::OpSetPropertyLong,
            44 => OpCode::OpGetSuper,
            45 => OpCode::OpGetSuperLong,
            46 => OpCode::OpInvoke,
            47 => OpCode::OpInvokeLong,
            48 => OpCode::OpSuperInvoke,
            49 => OpCode::OpSuperInvokeLong,
            50 => OpCode::OpReturn,
            _ => panic!("Unknown opcode {}", byte),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Operand widths in bytes, in operand order. `OpClosure` additionally reads
/// a variable run of `(is_local, index)` byte pairs that is not described
/// here; the disassembler and VM decode it from the function constant.
pub fn operand_widths(op: OpCode) -> Vec<usize> {
    match op {
        OpCode::OpConstant
        | OpCode::OpDefineGlobal
        | OpCode::OpGetGlobal
        | OpCode::OpSetGlobal
        | OpCode::OpGetLocal
        | OpCode::OpSetLocal
        | OpCode::OpGetUpvalue
        | OpCode::OpSetUpvalue
        | OpCode::OpCall
        | OpCode::OpClosure
        | OpCode::OpClass
        | OpCode::OpMethod
        | OpCode::OpGetProperty
        | OpCode::OpSetProperty
        | OpCode::OpGetSuper => vec![1],
        OpCode::OpConstantLong
        | OpCode::OpDefineGlobalLong
        | OpCode::OpGetGlobalLong
        | OpCode::OpSetGlobalLong
        | OpCode::OpClassLong
        | OpCode::OpMethodLong
        | OpCode::OpGetPropertyLong
        | OpCode::OpSetPropertyLong
        | OpCode::OpGetSuperLong => vec![3],
        OpCode::OpJump | OpCode::OpJumpIfFalse | OpCode::OpLoop => vec![2],
        OpCode::OpInvoke | OpCode::OpSuperInvoke => vec![1, 1],
        OpCode::OpInvokeLong | OpCode::OpSuperInvokeLong => vec![3, 1],
        _ => vec![],
    }
}

pub fn read_u8(code: &[u8], offset: usize) -> u8 {
    code[offset]
}

pub fn read_u16(code: &[u8], offset: usize) -> u16 {
    ((code[offset] as u16) << 8) | (code[offset + 1] as u16)
}

pub fn read_u24(code: &[u8], offset: usize) -> u32 {
    ((code[offset] as u32) << 16) | ((code[offset + 1] as u32) << 8) | (code[offset + 2] as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_discriminants() {
        for byte in 0..=50u8 {
            let op = OpCode::from(byte);
            assert_eq!(op as u8, byte);
        }
    }

    #[test]
    fn test_long_variants_are_short_plus_one() {
        for op in [
            OpCode::OpConstant,
            OpCode::OpDefineGlobal,
            OpCode::OpGetGlobal,
            OpCode::OpSetGlobal,
            OpCode::OpClass,
            OpCode::OpMethod,
            OpCode::OpGetProperty,
            OpCode::OpSetProperty,
            OpCode::OpGetSuper,
            OpCode::OpInvoke,
            OpCode::OpSuperInvoke,
        ] {
            assert_eq!(op.long_variant() as u8, op as u8 + 1);
            assert_eq!(operand_widths(op.long_variant())[0], 3);
        }
    }

    #[test]
    fn test_readers_are_big_endian() {
        let code = [0x12, 0x34, 0x56];
        assert_eq!(read_u8(&code, 0), 0x12);
        assert_eq!(read_u16(&code, 0), 0x1234);
        assert_eq!(read_u24(&code, 0), 0x123456);
    }
}
