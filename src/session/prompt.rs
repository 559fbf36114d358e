//! Prompt and error recognition for IOS-style CLIs.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

/// Prompt the shell is sitting at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PromptKind {
    /// `R1>`
    User,
    /// `R1#`
    Privileged,
    /// `R1(config)#`, `R1(config-if)#`
    Config,
    /// `Password:` after `enable`.
    Password,
    /// Pager marker; answered with a space.
    More,
}

/// Order matches [`PromptKind`] lookup in [`classify`].
static PROMPTS: Lazy<RegexSet> = Lazy::new(|| {
    match RegexSet::new([
        r"^\x00*\r?\S+\(\S+\)#\s*$",
        r"^\x00*\r?[^\s#(]+#\s*$",
        r"^\x00*\r?[^\s<>]+>\s*$",
        r"^\x00*\r?(Enable )?Password:\s*$",
        r"\s*(--More--|<--- More --->)\s*$",
    ]) {
        Ok(set) => set,
        Err(err) => panic!("invalid PROMPTS regex set: {err}"),
    }
});

/// Device answers that mean a line was refused. Informational `%` lines
/// such as `%Warning:` or `% Generating ... keys` are not among them.
static ERROR_LINE: Lazy<RegexSet> = Lazy::new(|| {
    match RegexSet::new([
        r"^%\s*(Invalid input|Incomplete command|Ambiguous command|Unknown command|Unrecognized command|Bad mask|Error|Cannot|Unable to)",
        r"^%.*\boverlaps with\b",
        r"^Command authorization failed.*",
        r"^Command rejected:.*",
        r"ERROR:.+",
        r"Access denied\.",
    ]) {
        Ok(set) => set,
        Err(err) => panic!("invalid ERROR_LINE regex set: {err}"),
    }
});

/// Carriage returns and backspaces terminals prepend to redrawn lines.
pub(super) static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );

/// Classifies the unterminated tail of the shell buffer.
pub(super) fn classify(tail: &str) -> Option<PromptKind> {
    let matched = PROMPTS.matches(tail);
    [
        PromptKind::Config,
        PromptKind::Privileged,
        PromptKind::User,
        PromptKind::Password,
        PromptKind::More,
    ]
    .into_iter()
    .enumerate()
    .find_map(|(i, kind)| matched.matched(i).then_some(kind))
}

pub(super) fn is_error_line(line: &str) -> bool {
    ERROR_LINE.is_match(line.trim())
}

/// Drops the echoed command and the trailing prompt from raw shell output.
pub(super) fn strip_echo_and_prompt(command: &str, raw: &str) -> String {
    let mut content = raw;
    if !command.is_empty() && content.starts_with(command) {
        content = content
            .strip_prefix(command)
            .unwrap_or(content)
            .trim_start_matches(['\n', '\r']);
    }
    match content.rfind('\n') {
        Some(pos) => content[..pos].trim_end_matches('\r').to_string(),
        None => String::new(),
    }
}
