//! The wire format: a little-endian byte buffer the compiler writes and the
//! VM reads. Every instruction is `opcode:u8` followed by fixed-width
//! operands; there is no variable-length encoding except for strings and the
//! occasional small_size-capped batch count.

use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x5255_4e43; // "RUNC"
pub const VERSION: u32 = 1;

/// A location on the value stack, relative to the current frame. Zero or
/// positive addresses a named slot; negative addresses a register.
pub type Location = i8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Reg = 0,
    Push,
    PushN,
    PushS,
    PushB,
    Pop,
    PopN,
    PopTo,
    PushVal,
    StoreAtNil,
    StoreAtF,
    Move,
    Add,
    Sub,
    Mul,
    Div,
    Not,
    And,
    Or,
    Eq,
    Neq,
    Gr,
    Gre,
    Ls,
    Lse,
    Jump,
    JumpCond,
    PCallSfG,
    PCallSfL,
    CallSfG,
    CallSfL,
    CallHf,
    Return,
    ReturnNil,
    ListNew,
    ListAdd,
    DictNew,
    DictAdd,
    Get,
    Set,
    Negate,
}

impl OpCode {
    pub fn from_u8(b: u8) -> Result<OpCode> {
        use OpCode::*;
        const TABLE: &[OpCode] = &[
            Reg, Push, PushN, PushS, PushB, Pop, PopN, PopTo, PushVal, StoreAtNil, StoreAtF, Move,
            Add, Sub, Mul, Div, Not, And, Or, Eq, Neq, Gr, Gre, Ls, Lse, Jump, JumpCond, PCallSfG,
            PCallSfL, CallSfG, CallSfL, CallHf, Return, ReturnNil, ListNew, ListAdd, DictNew,
            DictAdd, Get, Set, Negate,
        ];
        TABLE
            .get(b as usize)
            .copied()
            .ok_or_else(|| Error::runtime(format!("unsupported opcode byte {}", b)))
    }
}

/// Maximum slots a single `PopN` instruction can remove; it is encoded as a
/// `u8` operand so it cannot reach 256.
pub const MAX_POP_N_BATCH: usize = u8::MAX as usize;

/// Appends instructions to a growable byte buffer, returning the byte offset
/// of multi-byte operands so the compiler can patch them later (jump
/// targets, register counts, the total-size header field).
#[derive(Debug, Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { bytes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn op(&mut self, code: OpCode) -> &mut Self {
        self.bytes.push(code as u8);
        self
    }

    pub fn loc(&mut self, location: Location) -> &mut Self {
        self.bytes.push(location as u8);
        self
    }

    pub fn small(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn boolean(&mut self, value: bool) -> &mut Self {
        self.bytes.push(value as u8);
        self
    }

    pub fn number(&mut self, value: f64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        let bytes = value.as_bytes();
        self.bytes
            .extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Writes a placeholder `u32` and returns its offset, to be overwritten
    /// later with [`Writer::patch_u32`].
    pub fn placeholder_u32(&mut self) -> usize {
        let at = self.bytes.len();
        self.bytes.extend_from_slice(&0u32.to_le_bytes());
        at
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn patch_u32(&mut self, at: usize, value: u32) {
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Writes a placeholder `u8` and returns its offset, for register/arg
    /// counts patched once the true value is known.
    pub fn placeholder_u8(&mut self) -> usize {
        let at = self.bytes.len();
        self.bytes.push(0);
        at
    }

    pub fn patch_u8(&mut self, at: usize, value: u8) {
        self.bytes[at] = value;
    }
}

/// Reads instructions and operands back out of a compiled buffer. The VM
/// drives this with a cursor that doubles as the instruction pointer used by
/// activation records.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pub cursor: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn at_end(&self) -> bool {
        self.cursor >= self.bytes.len()
    }

    pub fn jump_to(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.cursor + n > self.bytes.len() {
            return Err(Error::runtime("bytecode buffer truncated"));
        }
        let slice = &self.bytes[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let bytes = self.take(1)?;
        Ok(bytes[0])
    }

    pub fn read_loc(&mut self) -> Result<Location> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_number(&mut self) -> Result<f64> {
        let bytes = self.take(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::runtime("bytecode buffer has invalid utf-8 string"))
    }

    pub fn read_opcode(&mut self) -> Result<OpCode> {
        OpCode::from_u8(self.read_u8()?)
    }
}

/// Writes the `magic, version, total_size placeholder` header common to
/// every compiled program. The caller patches the size once the body is
/// written.
pub fn write_header(writer: &mut Writer) -> usize {
    writer.u32(MAGIC);
    writer.u32(VERSION);
    writer.placeholder_u32()
}

pub fn read_header(reader: &mut Reader) -> Result<u32> {
    let magic = reader.read_u32()?;
    if magic != MAGIC {
        return Err(Error::BadMagic);
    }
    let version = reader.read_u32()?;
    if version != VERSION {
        return Err(Error::VersionMismatch {
            found: version,
            supported: VERSION,
        });
    }
    reader.read_u32()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_operand_width() {
        let mut w = Writer::new();
        w.op(OpCode::Add);
        w.loc(-3);
        w.small(200);
        w.boolean(true);
        w.number(3.5);
        w.string("hi");
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_opcode().unwrap(), OpCode::Add);
        assert_eq!(r.read_loc().unwrap(), -3);
        assert_eq!(r.read_u8().unwrap(), 200);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_number().unwrap(), 3.5);
        assert_eq!(r.read_string().unwrap(), "hi");
        assert!(r.at_end());
    }

    #[test]
    fn patches_a_placeholder_after_the_fact() {
        let mut w = Writer::new();
        let at = w.placeholder_u32();
        w.op(OpCode::Pop);
        w.patch_u32(at, 42);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u32().unwrap(), 42);
    }

    #[test]
    fn rejects_a_bad_magic_number() {
        let mut w = Writer::new();
        w.u32(0xdead_beef);
        w.u32(VERSION);
        w.placeholder_u32();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(read_header(&mut r), Err(Error::BadMagic)));
    }
}
