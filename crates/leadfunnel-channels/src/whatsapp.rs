//! WhatsApp click-to-chat links.

use crate::encode_component;

const CHAT_BASE: &str = "https://wa.me/";

/// `https://wa.me/<digits>?text=<message>`.
///
/// wa.me only accepts the bare international number, so everything that is
/// not an ASCII digit (`+`, spaces, brackets, dashes) is stripped.
pub fn chat_link(number: &str, message: &str) -> String {
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    format!("{CHAT_BASE}{digits}?text={}", encode_component(message))
}
