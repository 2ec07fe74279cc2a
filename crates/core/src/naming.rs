//! Migration name transforms
//!
//! Migration files carry a snake_case identifier; generators display
//! the same name in class style (`CreateUsers`). Both transforms are
//! pure and stable: `to_identifier(to_class_name(x)) == to_identifier(x)`.

/// Normalize a human-provided name into a snake_case identifier.
///
/// Splits on non-alphanumeric boundaries and on lower-to-upper camel
/// case transitions, lower-cases each segment, and joins with `_`.
pub fn to_identifier(input: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in input.chars() {
        if !ch.is_ascii_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_ascii_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(ch.to_ascii_lowercase());
        prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
    }
    if !current.is_empty() {
        words.push(current);
    }
    words.join("_")
}

/// Render a snake_case identifier in class style: each segment
/// capitalized and concatenated.
pub fn to_class_name(identifier: &str) -> String {
    identifier
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|segment| !segment.is_empty())
        .map(capitalize)
        .collect()
}

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
        None => String::new(),
    }
}
