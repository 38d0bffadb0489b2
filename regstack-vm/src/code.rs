use crate::isa::OPERAND_WIDTH;

/// Growable code memory. Positions handed out are byte indices, so growing the
/// backing vector never invalidates a recorded patch site.
#[derive(Clone, Debug, Default)]
pub struct CodeBuffer {
    code: Vec<u8>,
}

impl CodeBuffer {
    pub const INITIAL_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self {
            code: Vec::with_capacity(Self::INITIAL_CAPACITY),
        }
    }

    pub fn position(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.code
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    pub fn emit_opcode(&mut self, opcode: u8) {
        self.code.push(opcode);
    }

    pub fn emit_operand(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    /// Overwrites a previously emitted operand word. Returns false when `at` does
    /// not address a complete word inside the buffer.
    pub fn patch_operand(&mut self, at: u32, value: i32) -> bool {
        let at = at as usize;
        match self.code.get_mut(at..at + OPERAND_WIDTH) {
            Some(slot) => {
                slot.copy_from_slice(&value.to_be_bytes());
                true
            }
            None => false,
        }
    }
}

pub fn read_operand(code: &[u8], at: usize) -> Option<i32> {
    let bytes = code.get(at..at.checked_add(OPERAND_WIDTH)?)?;
    Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
