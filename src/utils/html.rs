use ammonia;

/// Clean HTML content using the ammonia library.
///
/// This employs a whitelist-based sanitization strategy: it preserves safe tags
/// (like <b>, <p>) while stripping dangerous tags (like <script>, <iframe>)
/// and malicious attributes (like onclick).
///
/// Used on form item titles and descriptions before they are cached for candidates.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Escapes plain text for interpolation into an HTML document.
pub fn escape_text(input: &str) -> String {
    ammonia::clean_text(input)
}

/// Serializes `value` for embedding inside a `<script>` element.
pub fn script_json<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}
