use std::fmt;

/// Human-readable rendering of raw link bytes for logs and debug buffers.
///
/// Renders every byte as a right-aligned decimal, then four spaces, then the
/// ASCII view with non-printable bytes (and space) shown as `.`:
///
/// ```text
///  79  75  13  10    OK..
/// ```
pub struct Printable<'a>(pub &'a [u8]);

impl fmt::Display for Printable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:>3}")?;
        }
        f.write_str("    ")?;
        for &byte in self.0 {
            let c = if byte > 32 && byte <= 126 {
                byte as char
            } else {
                '.'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Printable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_bytes_and_ascii() {
        assert_eq!(Printable(b"OK\r\n").to_string(), " 79  75  13  10    OK..");
    }

    #[test]
    fn space_is_not_printable() {
        assert_eq!(Printable(b"a b").to_string(), " 97  32  98    a.b");
    }

    #[test]
    fn empty_input() {
        assert_eq!(Printable(b"").to_string(), "    ");
    }
}
