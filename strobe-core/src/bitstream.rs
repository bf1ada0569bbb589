//! MSB-first bit reader for in-band codec headers.

/// Bit reader with an error latch: reading past the end returns zeros and
/// sets the error flag instead of panicking, so header parsers can check
/// once at the end.
pub struct BitReader<'a> {
    data: &'a [u8],
    offset: usize,
    len_bits: usize,
    error: bool,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            len_bits: data.len() * 8,
            error: false,
        }
    }

    pub fn read_bits(&mut self, mut num: u32) -> u32 {
        let mut r = 0u32;
        while num > 0 {
            if self.offset >= self.len_bits {
                self.error = true;
                return 0;
            }
            num -= 1;
            if self.data[self.offset / 8] & (1 << (7 - (self.offset & 7))) != 0 {
                r |= 1 << num;
            }
            self.offset += 1;
        }
        r
    }

    /// Exp-Golomb unsigned. A code with 32 or more leading zero bits cannot
    /// fit in the result and latches the error instead.
    pub fn read_golomb_ue(&mut self) -> u32 {
        let mut leading_zeros = 0u32;
        loop {
            if leading_zeros >= 32 || self.error {
                self.error = true;
                return 0;
            }
            if self.read_bits(1) != 0 {
                break;
            }
            leading_zeros += 1;
        }
        if leading_zeros == 0 {
            return 0;
        }
        (1u32 << leading_zeros) - 1 + self.read_bits(leading_zeros)
    }

    /// Exp-Golomb signed.
    pub fn read_golomb_se(&mut self) -> i32 {
        let ue = self.read_golomb_ue();
        if ue & 1 != 0 {
            ((ue + 1) / 2) as i32
        } else {
            -((ue / 2) as i32)
        }
    }

    pub fn skip_bits(&mut self, num: u32) {
        self.read_bits(num);
    }

    pub fn has_error(&self) -> bool {
        self.error
    }
}
