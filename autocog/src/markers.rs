//! Wire format for pulling generated files and commands out of response text.
//!
//! Files are bracketed by `-- FILE_START: <name>` / `-- FILE_END: <name>`;
//! commands by `-- COMMAND_START` / `-- COMMAND_END`. A single fenced code
//! block immediately inside the markers is stripped.

use regex::Regex;

pub const FILE_START: &str = "-- FILE_START: ";
pub const FILE_END: &str = "-- FILE_END: ";
pub const COMMAND_START: &str = "-- COMMAND_START";
pub const COMMAND_END: &str = "-- COMMAND_END";

pub fn file_start(name: &str) -> String {
    format!("{FILE_START}{name}")
}

pub fn file_end(name: &str) -> String {
    format!("{FILE_END}{name}")
}

#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    #[error("response does not contain a marker pair for {name}")]
    MissingFile { name: String },
    #[error("response does not contain a command marker pair")]
    MissingCommand,
}

/// Extract the content bracketed by the marker pair for `name`, trimmed and
/// with a single wrapping fenced block removed.
pub fn extract_file(content: &str, name: &str) -> Result<String, MarkerError> {
    let pattern = format!(
        "(?s){}(.*?){}",
        regex::escape(&file_start(name)),
        regex::escape(&file_end(name))
    );
    let re = Regex::new(&pattern).expect("marker pattern is valid");
    match re.captures(content) {
        Some(caps) => Ok(strip_fence(caps[1].trim()).to_string()),
        None => Err(MarkerError::MissingFile { name: name.into() }),
    }
}

/// Extract the command bracketed by `COMMAND_START`/`COMMAND_END`.
pub fn extract_command(content: &str) -> Result<String, MarkerError> {
    let pattern = format!(
        "(?s){}(.*?){}",
        regex::escape(COMMAND_START),
        regex::escape(COMMAND_END)
    );
    let re = Regex::new(&pattern).expect("marker pattern is valid");
    match re.captures(content) {
        Some(caps) => Ok(strip_fence(caps[1].trim()).trim().to_string()),
        None => Err(MarkerError::MissingCommand),
    }
}

/// Remove one wrapping ``` fence, if present. The opening fence may carry a
/// language tag.
fn strip_fence(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(newline) = rest.find('\n') else {
        return trimmed;
    };
    let body = &rest[newline + 1..];
    let Some(body) = body.trim_end().strip_suffix("```") else {
        return trimmed;
    };
    body.trim_matches('\n')
}
