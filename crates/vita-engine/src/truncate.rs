use std::borrow::Cow;

/// Cap a tool result at `max_bytes` before it is fed back to the model.
///
/// The cut never splits a UTF-8 sequence. A trailing note records how much
/// was dropped so the model knows the payload is partial.
pub fn truncate_output(output: &str, max_bytes: usize) -> Cow<'_, str> {
    if output.len() <= max_bytes {
        return Cow::Borrowed(output);
    }
    let kept = output
        .char_indices()
        .map(|(at, _)| at)
        .take_while(|&at| at <= max_bytes)
        .last()
        .unwrap_or(0);
    Cow::Owned(format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &output[..kept],
        output.len(),
        kept
    ))
}
