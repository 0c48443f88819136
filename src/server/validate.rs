//! Content checks for files edited through the admin UI.
//!
//! The hook layer parses these files line by line, some of them from shell.
//! Known files are held to their grammar; anything else is accepted as is.

use regex::Regex;
use std::sync::LazyLock;

static PKG_NAME: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[a-zA-Z0-9_.*]+$"));
static TEMPLATE_NAME: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[a-zA-Z0-9_-]+$"));
static KEYBOX_FILENAME: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[a-zA-Z0-9_.-]+$"));
static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[a-zA-Z0-9_.]+=.+$"));
static SAFE_BUILD_VAR_VALUE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"^[a-zA-Z0-9_\-.\s/:,+=()@]*$"));
static TARGET_PKG: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[a-zA-Z0-9_.*!]+$"));
static SECURITY_PATCH: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[a-zA-Z0-9_=-]+$"));
static PERMISSIONS: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[a-zA-Z0-9_.,]+$"));

fn static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("Invalid regex")
}

fn check_lines<F>(file: &str, content: &str, mut ok: F) -> Result<(), String>
where
    F: FnMut(&str) -> bool,
{
    for (n, line) in content.split('\n').enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if !ok(line) {
            return Err(format!("{}: invalid line {}", file, n + 1));
        }
    }
    Ok(())
}

fn optional_field(value: Option<&&str>, re: &Regex) -> bool {
    match value {
        None => true,
        Some(&"null") => true,
        Some(v) => re.is_match(v),
    }
}

/// Check `content` against the grammar of the file called `file_name`.
///
/// Returns a message suitable for the client on failure.
pub fn validate_content(file_name: &str, content: &str) -> Result<(), String> {
    match file_name {
        "target.txt" => check_lines(file_name, content, |line| {
            line.is_empty() || line.starts_with('#') || TARGET_PKG.is_match(line)
        }),
        "security_patch.txt" => check_lines(file_name, content, |line| {
            line.is_empty() || SECURITY_PATCH.is_match(line)
        }),
        "spoof_build_vars" => check_lines(file_name, content, |line| {
            if line.is_empty() || line.starts_with('#') {
                return true;
            }
            if !KEY_VALUE.is_match(line) {
                return false;
            }
            line.split_once('=')
                .is_some_and(|(_, value)| SAFE_BUILD_VAR_VALUE.is_match(value))
        }),
        "app_config" => check_lines(file_name, content, |line| {
            if line.trim().is_empty() || line.starts_with('#') {
                return true;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            parts.len() <= 4
                && parts.first().is_some_and(|pkg| PKG_NAME.is_match(pkg))
                && optional_field(parts.get(1), &TEMPLATE_NAME)
                && optional_field(parts.get(2), &KEYBOX_FILENAME)
                && optional_field(parts.get(3), &PERMISSIONS)
        }),
        "templates.json" => match serde_json::from_str::<serde_json::Value>(content) {
            Ok(serde_json::Value::Object(_)) | Ok(serde_json::Value::Array(_)) => Ok(()),
            _ => Err("templates.json must be a JSON object or array".to_string()),
        },
        _ => Ok(()),
    }
}
