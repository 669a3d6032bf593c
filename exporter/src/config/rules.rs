use crate::error::SvcError;

/// Whitelist and filtering rules applied during extraction.
#[derive(Debug, Clone, Default)]
pub struct InclusionRules {
    /// Resource plurals, bare (`configmaps`) or grouped
    /// (`deployments.apps`).
    pub include_resources: Vec<String>,
    /// Target namespaces, in backup order.
    pub include_namespaces: Vec<String>,
    /// Raw label selector forwarded to every list request.
    pub label_selector: Option<String>,
    /// Single `key=value` annotation gate.
    pub annotation_selector: Option<(String, String)>,
    /// Upper bound on the serialized document, bytes. `None` disables
    /// the gate.
    pub max_resource_size: Option<u64>,
    pub follow_owner_references: bool,
    pub include_managed_fields: bool,
    pub include_status: bool,
    pub validate_yaml: bool,
    pub skip_invalid_resources: bool,
}

/// Split a newline/comma separated list, dropping blanks and `#`
/// comments.
pub fn parse_name_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| match line.find('#') {
            Some(at) => &line[.. at],
            None => line,
        })
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a size literal: an integer with an optional `K`, `M`, `G`,
/// `Ki`, `Mi` or `Gi` unit.
pub fn parse_size_literal(raw: &str) -> Result<u64, SvcError> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().map_err(|_| SvcError::InvalidConfig {
        reason: format!("invalid size literal '{raw}'"),
    })?;
    let factor: u64 = match unit {
        "" => 1,
        "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        _ => {
            return Err(SvcError::InvalidConfig {
                reason: format!("unknown size unit '{unit}' in '{raw}'"),
            })
        }
    };
    value
        .checked_mul(factor)
        .ok_or_else(|| SvcError::InvalidConfig {
            reason: format!("size literal '{raw}' overflows"),
        })
}

/// Parse the `key=value` annotation selector. A malformed selector is a
/// fatal configuration error rather than a silent no-op.
pub fn parse_annotation_selector(raw: &str) -> Result<(String, String), SvcError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() && !value.contains('=') => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(SvcError::InvalidConfig {
            reason: format!("annotation selector '{raw}' is not a single key=value pair"),
        }),
    }
}
