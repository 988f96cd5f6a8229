//! `mailto:` URIs.

use crate::encode_component;

/// Subject line for a hand-off email.
pub fn email_subject(clinic_name: &str) -> String {
    let name = clinic_name.trim();
    if name.is_empty() {
        "Treatment enquiry".to_string()
    } else {
        format!("Treatment enquiry for {name}")
    }
}

/// `mailto:<address>?subject=<subject>&body=<message>`.
pub fn mailto_uri(address: &str, clinic_name: &str, message: &str) -> String {
    format!(
        "mailto:{}?subject={}&body={}",
        address.trim(),
        encode_component(&email_subject(clinic_name)),
        encode_component(message)
    )
}
