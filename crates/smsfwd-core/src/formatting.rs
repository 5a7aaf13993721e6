/// Escape text for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `<code>`-wrap escaped text.
pub fn code(text: &str) -> String {
    format!("<code>{}</code>", escape_html(text))
}
