/// Shortens a hex identifier to `aaaaa:zzzzz` for display fallbacks.
///
/// Inputs of ten characters or fewer are returned unchanged.
pub fn shorten_hex(hex: &str) -> String {
    if hex.len() <= 10 || !hex.is_ascii() {
        return hex.to_string();
    }
    let heading = &hex[0..5];
    let trail = &hex[hex.len() - 5..];
    format!("{heading}:{trail}")
}
