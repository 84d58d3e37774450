//! Replication configuration templates.
//!
//! Templates use `{{ key }}` placeholders. Rendered output is a
//! `key = 'value'` file in the format PostgreSQL reads recovery settings from.

use std::collections::BTreeMap;

use replicant_common::{ClusterError, ClusterIdentity, PrimaryName, Result};

/// Value key for the primary name in rendered templates.
pub const MASTER_CNAME_KEY: &str = "master_cname";

/// Alias of [`MASTER_CNAME_KEY`].
pub const PRIMARY_NAME_KEY: &str = "primary_name";

/// Build the substitution values for a node's recovery template.
///
/// Metadata attributes come first, then deployment settings, then the
/// primary name; later sources win on conflicting keys.
pub fn recovery_values(
    identity: &ClusterIdentity,
    settings: &BTreeMap<String, String>,
    primary_name: &PrimaryName,
) -> BTreeMap<String, String> {
    let mut values = identity.attributes().clone();
    values.extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));
    values.insert(MASTER_CNAME_KEY.to_string(), primary_name.to_string());
    values.insert(PRIMARY_NAME_KEY.to_string(), primary_name.to_string());
    values
}

/// Substitute every `{{ key }}` placeholder in `template`.
///
/// Values are written for single-quoted settings: `'` is doubled. Fails on a
/// placeholder with no value, one that is never closed, or a value holding a
/// line break, which the settings format cannot carry.
pub fn render(template: &str, values: &BTreeMap<String, String>) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            ClusterError::ConfigurationError("unterminated template placeholder".to_string())
        })?;

        let key = after[..end].trim();
        let value = values
            .get(key)
            .ok_or_else(|| ClusterError::MissingTemplateKey(key.to_string()))?;
        if value.contains(|c: char| c == '\n' || c == '\r') {
            return Err(ClusterError::ConfigurationError(format!(
                "template value for {} contains a line break",
                key
            )));
        }
        output.push_str(&value.replace('\'', "''"));
        rest = &after[end + 2..];
    }

    output.push_str(rest);
    Ok(output)
}

/// Parse a rendered `key = value` settings file.
///
/// Values may be bare words or single-quoted with `''` escaping a quote.
/// Blank lines and `#` comments are skipped.
pub fn parse_recovery_conf(text: &str) -> Result<BTreeMap<String, String>> {
    let mut settings = BTreeMap::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, raw) = line.split_once('=').ok_or_else(|| {
            ClusterError::ConfigurationError(format!("line {}: expected key = value", index + 1))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ClusterError::ConfigurationError(format!(
                "line {}: empty key",
                index + 1
            )));
        }

        let value = parse_value(raw.trim()).map_err(|reason| {
            ClusterError::ConfigurationError(format!("line {}: {}", index + 1, reason))
        })?;
        settings.insert(key.to_string(), value);
    }

    Ok(settings)
}

fn parse_value(raw: &str) -> std::result::Result<String, &'static str> {
    let Some(quoted) = raw.strip_prefix('\'') else {
        let bare = raw.split('#').next().unwrap_or("");
        return Ok(bare.trim().to_string());
    };

    let mut value = String::new();
    let mut chars = quoted.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '\'' {
            value.push(c);
            continue;
        }
        if matches!(chars.peek(), Some((_, '\''))) {
            chars.next();
            value.push('\'');
            continue;
        }

        // Closing quote: only whitespace or a comment may follow.
        let rest = chars.peek().map_or("", |&(at, _)| &quoted[at..]).trim_start();
        if rest.is_empty() || rest.starts_with('#') {
            return Ok(value);
        }
        return Err("unexpected text after closing quote");
    }
    Err("unterminated quote")
}
