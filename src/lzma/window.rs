//! The LZMA sliding-window dictionary. Persisted across sub-block calls for LZMA_SPD (see
//! [`super::lzma_spd`]), since matches in a later sub-block may reference bytes produced while
//! decoding an earlier one.

pub struct OutputWindow {
    buf: Vec<u8>,
    pos: usize,
    is_full: bool,
    total_pos: u64,
    out: Vec<u8>,
}

impl OutputWindow {
    pub fn new(dict_size: usize) -> Self {
        let dict_size = dict_size.max(1);
        Self {
            buf: vec![0u8; dict_size],
            pos: 0,
            is_full: false,
            total_pos: 0,
            out: Vec::new(),
        }
    }

    pub fn total_pos(&self) -> u64 {
        self.total_pos
    }

    /// Takes the bytes produced since the last call, leaving the dictionary window intact.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    pub fn put_byte(&mut self, byte: u8) {
        self.total_pos += 1;
        self.buf[self.pos] = byte;
        self.pos += 1;
        if self.pos == self.buf.len() {
            self.pos = 0;
            self.is_full = true;
        }
        self.out.push(byte);
    }

    pub fn get_byte(&self, distance: u32) -> u8 {
        let dist = distance as usize + 1;
        let index = if dist <= self.pos {
            self.pos - dist
        } else {
            self.buf.len() - dist + self.pos
        };
        self.buf[index]
    }

    pub fn copy_match(&mut self, distance: u32, len: u32) {
        for _ in 0..len {
            let byte = self.get_byte(distance);
            self.put_byte(byte);
        }
    }

    pub fn check_distance(&self, distance: u32) -> bool {
        distance as usize <= self.pos || self.is_full
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0 && !self.is_full
    }
}
