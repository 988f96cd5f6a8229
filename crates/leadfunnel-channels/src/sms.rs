//! `sms:` URIs.

use crate::encode_component;

/// `sms:<number>?body=<message>`.
///
/// Uses `?body=` rather than the `&body=` form some iOS versions accepted;
/// current Android and iOS clients both handle the query form.
pub fn sms_uri(number: &str, message: &str) -> String {
    let number: String = number
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    format!("sms:{number}?body={}", encode_component(message))
}
