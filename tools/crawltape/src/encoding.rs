//! Text/byte conversion with the encoding recorded alongside a capture.
//!
//! Header values and bodies are kept as raw bytes. Whenever they need to be
//! viewed as text (comparison, inspection, legacy upgrade), the label recorded
//! in the fixture is used rather than the runtime's default.

use encoding_rs::{Encoding, UTF_8};

pub fn resolve(label: &str) -> &'static Encoding {
    match Encoding::for_label_no_replacement(label.trim().as_bytes()) {
        Some(encoding) => encoding,
        None => {
            tracing::warn!(label, "unknown text encoding, falling back to utf-8");
            UTF_8
        }
    }
}

pub fn decode_text(bytes: &[u8], label: &str) -> String {
    let (text, _, _) = resolve(label).decode(bytes);
    text.into_owned()
}

pub fn encode_text(text: &str, label: &str) -> Vec<u8> {
    // encoding_rs only encodes to utf-8 for the utf-16 family.
    let (bytes, _, _) = resolve(label).encode(text);
    bytes.into_owned()
}

/// Canonical name of `label`, e.g. `latin1` becomes `windows-1252`.
pub fn canonical_name(label: &str) -> &'static str {
    resolve(label).name()
}
