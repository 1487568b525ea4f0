/// Strip control bytes the attach transport can interleave with the
/// result document. Whitespace (newline, tab, carriage return) survives.
pub fn sanitize(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect()
}
