//! Optional output capping.
//!
//! Full capture is the default. When an operator configures a cap, the middle
//! of the stream is dropped so both the first lines (what the script started
//! doing) and the last lines (how it finished or failed) survive.

/// Cap `output` at `max_chars` characters, or return it whole when `max_chars`
/// is `None` or the text already fits.
///
/// The cut points are character boundaries, never inside a UTF-8 sequence.
pub fn cap_output(output: String, max_chars: Option<usize>) -> String {
    let Some(max) = max_chars else {
        return output;
    };
    // byte length is an upper bound on char count
    if output.len() <= max {
        return output;
    }
    let total = output.chars().count();
    if total <= max {
        return output;
    }

    let head_chars = max / 2;
    let tail_chars = max - head_chars;
    let omitted = total - max;

    let head_end = output
        .char_indices()
        .nth(head_chars)
        .map_or(output.len(), |(i, _)| i);
    let tail_start = output
        .char_indices()
        .nth(total - tail_chars)
        .map_or(output.len(), |(i, _)| i);

    format!(
        "{}\n[... {omitted} chars omitted ...]\n{}",
        &output[..head_end],
        &output[tail_start..]
    )
}
