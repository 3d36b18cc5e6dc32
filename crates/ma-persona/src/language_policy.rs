//! Code-review language policy guard (spec §4.6 step 7): short-circuits a
//! code-reviewer dispatch before any LM call when the payload declares an
//! `allowed_languages` list and a touched file doesn't match it.

use ma_core::context::persona;
use serde_json::Value;

fn extension_for(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(_, ext)| ext)
}

/// Map an `allowed_languages` entry (e.g. `"rust"`, `"typescript"`) to the
/// file extensions it accepts. Entries already shaped like an extension
/// (`"rs"`) are accepted as-is.
fn language_extensions(language: &str) -> Vec<&'static str> {
    match language.to_ascii_lowercase().as_str() {
        "rust" | "rs" => vec!["rs"],
        "typescript" | "ts" => vec!["ts", "tsx"],
        "javascript" | "js" => vec!["js", "jsx", "mjs"],
        "python" | "py" => vec!["py"],
        "go" | "golang" => vec!["go"],
        "java" => vec!["java"],
        "ruby" | "rb" => vec!["rb"],
        _ => vec![],
    }
}

/// Returns the first path that violates the `allowed_languages` policy, if
/// the guard applies and a violation exists. The guard only applies to
/// the code-reviewer persona and only when `allowed_languages` is present.
pub fn find_language_violation(persona_name: &str, payload: &Value) -> Option<String> {
    if persona_name != persona::CODE_REVIEWER {
        return None;
    }
    let allowed = payload.get("allowed_languages")?.as_array()?;
    let allowed_exts: Vec<&str> = allowed
        .iter()
        .filter_map(Value::as_str)
        .flat_map(language_extensions)
        .collect();
    if allowed_exts.is_empty() {
        return None;
    }

    let paths = payload.get("paths")?.as_array()?;
    for path in paths.iter().filter_map(Value::as_str) {
        match extension_for(path) {
            Some(ext) if allowed_exts.contains(&ext) => continue,
            _ => return Some(path.to_string()),
        }
    }
    None
}
