//! In-band terminal control messages
//!
//! A client resizes its terminal by sending `ESC [ 8 ; <rows> ; <cols> t`
//! (the xterm window-manipulation sequence) as a whole message. The
//! trailing `t` is optional. Anything that does not have this shape is
//! keystroke data and is forwarded to the shell untouched.

/// Terminal geometry in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtyGeometry {
    pub rows: u32,
    pub cols: u32,
}

impl PtyGeometry {
    pub const fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }
}

impl Default for PtyGeometry {
    fn default() -> Self {
        Self::new(40, 200)
    }
}

/// Classification of one inbound client message
#[derive(Debug, PartialEq, Eq)]
pub enum InboundMessage<'a> {
    /// Raw bytes for the shell's stdin
    Keystrokes(&'a [u8]),
    /// Well-formed resize request
    Resize(PtyGeometry),
    /// Resize-shaped message with unusable dimensions; dropped
    Malformed(String),
}

const RESIZE_PREFIX: &[u8] = b"\x1b[8;";

/// Classify an inbound message
///
/// NIST 800-53: SI-10 (Input Validation)
/// Implementation: Only all-digit dimensions in `1..=65535` produce a resize;
/// zero or oversized values are reported as malformed and never reach the PTY
pub fn classify(message: &[u8]) -> InboundMessage<'_> {
    let Some(body) = message.strip_prefix(RESIZE_PREFIX) else {
        return InboundMessage::Keystrokes(message);
    };
    let body = body.strip_suffix(b"t").unwrap_or(body);

    let mut fields = body.split(|byte| *byte == b';');
    let (Some(rows), Some(cols), None) = (fields.next(), fields.next(), fields.next()) else {
        return InboundMessage::Keystrokes(message);
    };
    if !is_digits(rows) || !is_digits(cols) {
        return InboundMessage::Keystrokes(message);
    }

    match (parse_dimension(rows), parse_dimension(cols)) {
        (Some(rows), Some(cols)) => InboundMessage::Resize(PtyGeometry::new(rows, cols)),
        _ => InboundMessage::Malformed(format!(
            "resize dimensions out of range: {}x{}",
            String::from_utf8_lossy(rows),
            String::from_utf8_lossy(cols)
        )),
    }
}

/// Encode a resize request the way clients send it
pub fn encode_resize(geometry: PtyGeometry) -> Vec<u8> {
    format!("\x1b[8;{};{}t", geometry.rows, geometry.cols).into_bytes()
}

fn is_digits(field: &[u8]) -> bool {
    !field.is_empty() && field.iter().all(u8::is_ascii_digit)
}

fn parse_dimension(field: &[u8]) -> Option<u32> {
    let value: u32 = std::str::from_utf8(field).ok()?.parse().ok()?;
    (1..=u32::from(u16::MAX)).contains(&value).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_with_terminator() {
        assert_eq!(
            classify(b"\x1b[8;40;120t"),
            InboundMessage::Resize(PtyGeometry::new(40, 120))
        );
    }

    #[test]
    fn test_resize_without_terminator() {
        assert_eq!(
            classify(b"\x1b[8;24;80"),
            InboundMessage::Resize(PtyGeometry::new(24, 80))
        );
    }

    #[test]
    fn test_plain_keystrokes_pass_through() {
        assert_eq!(classify(b"ls\r"), InboundMessage::Keystrokes(b"ls\r"));
        assert_eq!(classify(b""), InboundMessage::Keystrokes(b""));
    }

    #[test]
    fn test_other_escape_sequences_pass_through() {
        // Cursor up and a long paste that merely starts like a CSI sequence
        assert_eq!(classify(b"\x1b[A"), InboundMessage::Keystrokes(b"\x1b[A"));
        let paste = b"\x1b[8;hello world, this is not a resize";
        assert_eq!(classify(paste), InboundMessage::Keystrokes(&paste[..]));
        assert_eq!(
            classify(b"\x1b[8;1;2;3t"),
            InboundMessage::Keystrokes(b"\x1b[8;1;2;3t")
        );
    }

    #[test]
    fn test_zero_dimensions_are_malformed() {
        assert!(matches!(
            classify(b"\x1b[8;0;80t"),
            InboundMessage::Malformed(_)
        ));
        assert!(matches!(
            classify(b"\x1b[8;24;99999999999t"),
            InboundMessage::Malformed(_)
        ));
    }

    #[test]
    fn test_encode_resize_is_classified_back() {
        let geometry = PtyGeometry::new(50, 132);
        assert_eq!(
            classify(&encode_resize(geometry)),
            InboundMessage::Resize(geometry)
        );
    }
}
