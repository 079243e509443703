/// Enough room for `u32::MAX` (10 digits) with two bytes spare.
pub const BUF_LEN: usize = 12;

/// ASCII decimal rendering of a `u32`, most significant digit first.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DecimalBuf {
    buf: [u8; BUF_LEN],
    len: usize,
}

impl DecimalBuf {
    pub fn new(value: u32) -> Self {
        let mut buf = [0u8; BUF_LEN];

        if value == 0 {
            buf[0] = b'0';
            return Self { buf, len: 1 };
        }

        // Digits come out least significant first.
        let mut len = 0;
        let mut rest = value;
        while rest > 0 {
            buf[len] = b'0' + (rest % 10) as u8;
            rest /= 10;
            len += 1;
        }
        buf[..len].reverse();

        Self { buf, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII digits are ever stored.
        core::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: zero renders as `"0"`.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl core::fmt::Debug for DecimalBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("DecimalBuf").field(&self.as_str()).finish()
    }
}

impl AsRef<[u8]> for DecimalBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

pub fn format_u32(value: u32) -> DecimalBuf {
    DecimalBuf::new(value)
}
