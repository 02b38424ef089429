//! Keystroke encoding for the interactive backend.

/// Map a named special key to its control-sequence encoding.
pub fn encode_special_key(key: &str) -> Option<&'static [u8]> {
    let bytes: &'static [u8] = match key {
        "up" => b"\x1b[A",
        "down" => b"\x1b[B",
        "right" => b"\x1b[C",
        "left" => b"\x1b[D",
        "escape" => b"\x1b",
        "tab" => b"\t",
        "shift-tab" => b"\x1b[Z",
        "backspace" => b"\x7f",
        "enter" | "return" => b"\r",
        "space" => b" ",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "page-up" => b"\x1b[5~",
        "page-down" => b"\x1b[6~",
        "delete" => b"\x1b[3~",
        "ctrl-c" => b"\x03",
        "ctrl-d" => b"\x04",
        _ => return None,
    };
    Some(bytes)
}

/// Encode raw text input.
///
/// A trailing carriage return is appended unless the text already ends in
/// a line terminator or begins with a control byte (callers sending bare
/// escape sequences get them through untouched).
pub fn encode_raw_text(text: &str) -> Vec<u8> {
    let starts_with_control = text
        .as_bytes()
        .first()
        .map(|b| *b < 0x20 || *b == 0x7f)
        .unwrap_or(false);
    let ends_with_terminator = text.ends_with('\n') || text.ends_with('\r');

    let mut bytes = text.as_bytes().to_vec();
    if !starts_with_control && !ends_with_terminator {
        bytes.push(b'\r');
    }
    bytes
}

/// Wrap a prompt in a bracketed paste so multi-line text arrives as one
/// input, then submit it.
pub fn encode_prompt(prompt: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(prompt.len() + 16);
    bytes.extend_from_slice(b"\x1b[200~");
    bytes.extend_from_slice(prompt.as_bytes());
    bytes.extend_from_slice(b"\x1b[201~");
    bytes.push(b'\r');
    bytes
}

/// A normalized permission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionAnswer {
    Approve,
    Deny,
}

impl PermissionAnswer {
    /// The single keystroke forwarded to the terminal: `\r` accepts the
    /// selected default option, escape dismisses the dialog.
    pub fn keystroke(&self) -> &'static [u8] {
        match self {
            Self::Approve => b"\r",
            Self::Deny => b"\x1b",
        }
    }
}

/// Normalize the yes/no synonyms clients send for permission responses.
pub fn normalize_permission_response(response: &str) -> Option<PermissionAnswer> {
    match response.trim().to_lowercase().as_str() {
        "y" | "yes" | "approve" | "allow" | "accept" | "ok" | "true" | "1" => {
            Some(PermissionAnswer::Approve)
        }
        "n" | "no" | "deny" | "reject" | "decline" | "false" | "2" => {
            Some(PermissionAnswer::Deny)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        encode_prompt, encode_raw_text, encode_special_key, normalize_permission_response,
        PermissionAnswer,
    };

    #[test]
    fn special_keys_map_to_control_sequences() {
        assert_eq!(encode_special_key("up"), Some(b"\x1b[A".as_slice()));
        assert_eq!(encode_special_key("escape"), Some(b"\x1b".as_slice()));
        assert_eq!(encode_special_key("tab"), Some(b"\t".as_slice()));
        assert_eq!(encode_special_key("backspace"), Some(b"\x7f".as_slice()));
        assert_eq!(encode_special_key("enter"), Some(b"\r".as_slice()));
        assert_eq!(encode_special_key("warp-drive"), None);
    }

    #[test]
    fn raw_text_gets_trailing_return() {
        assert_eq!(encode_raw_text("hi"), b"hi\r");
    }

    #[test]
    fn terminated_text_passes_through() {
        assert_eq!(encode_raw_text("hi\n"), b"hi\n");
        assert_eq!(encode_raw_text("hi\r"), b"hi\r");
    }

    #[test]
    fn control_prefixed_text_passes_through() {
        assert_eq!(encode_raw_text("\x1b[A"), b"\x1b[A");
        assert_eq!(encode_raw_text("\x03"), b"\x03");
    }

    #[test]
    fn prompt_uses_bracketed_paste() {
        let encoded = encode_prompt("fix the bug");
        assert!(encoded.starts_with(b"\x1b[200~"));
        assert!(encoded.ends_with(b"\x1b[201~\r"));
    }

    #[test]
    fn permission_synonyms_normalize() {
        for yes in ["yes", "Y", "approve", "Allow", "1"] {
            assert_eq!(
                normalize_permission_response(yes),
                Some(PermissionAnswer::Approve),
                "{yes}"
            );
        }
        for no in ["no", "N", "deny", "reject", "2"] {
            assert_eq!(
                normalize_permission_response(no),
                Some(PermissionAnswer::Deny),
                "{no}"
            );
        }
        assert_eq!(normalize_permission_response("maybe"), None);
    }
}
