//! Title/description clipping for outbound task creation (spec §4.3).

const TITLE_MAX: usize = 180;
const DESCRIPTION_MAX: usize = 10_000;
const TRUNCATION_MARKER: &str = "\n\n[...truncated]";

pub(crate) fn clip_title(title: &str) -> String {
    clip_chars(title, TITLE_MAX, "")
}

pub(crate) fn clip_description(description: &str) -> String {
    clip_chars(description, DESCRIPTION_MAX, TRUNCATION_MARKER)
}

fn clip_chars(input: &str, max_chars: usize, marker: &str) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let budget = max_chars.saturating_sub(marker.chars().count());
    let mut out: String = input.chars().take(budget).collect();
    out.push_str(marker);
    out
}
