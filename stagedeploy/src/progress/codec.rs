//! `KEY=value` encoding of the progress record.
//!
//! One assignment per line with POSIX shell quoting, so the file can be
//! `source`d by a shell as well as parsed here.

use super::ProgressRecord;
use crate::config::{Configuration, FeatureToggles};
use crate::errors::ProgressError;
use crate::utils::{format_timestamp, parse_timestamp};
use std::collections::HashMap;

const LAST_COMPLETED_STAGE: &str = "LAST_COMPLETED_STAGE";
const LAST_COMPLETED_STAGE_NAME: &str = "LAST_COMPLETED_STAGE_NAME";
const STACK_NAME: &str = "STACK_NAME";
const REGION: &str = "REGION";
const ENVIRONMENT: &str = "ENVIRONMENT";
const PROFILE: &str = "PROFILE";
const SKIP_PREREQUISITES: &str = "SKIP_PREREQUISITES";
const NO_IDENTIFIER_SUFFIX: &str = "NO_IDENTIFIER_SUFFIX";
const TIMESTAMP: &str = "TIMESTAMP";

/// Renders a record as assignment lines.
#[must_use]
pub fn encode(record: &ProgressRecord) -> String {
    let config = &record.configuration;
    let fields = [
        (LAST_COMPLETED_STAGE, record.last_completed_stage.to_string()),
        (LAST_COMPLETED_STAGE_NAME, record.last_completed_stage_name.clone()),
        (STACK_NAME, config.name.clone()),
        (REGION, config.region.clone()),
        (ENVIRONMENT, config.environment.clone()),
        (PROFILE, config.profile.clone()),
        (SKIP_PREREQUISITES, config.toggles.skip_prerequisites.to_string()),
        (NO_IDENTIFIER_SUFFIX, config.toggles.no_identifier_suffix.to_string()),
        (TIMESTAMP, format_timestamp(&record.timestamp)),
    ];

    let mut out = String::new();
    for (key, value) in fields {
        out.push_str(key);
        out.push('=');
        out.push_str(&shell_words::quote(&value));
        out.push('\n');
    }
    out
}

/// Parses assignment lines back into a record.
///
/// Blank lines, `#` comments and unknown keys are ignored.
///
/// # Errors
///
/// Returns [`ProgressError::Malformed`] when a line is not an assignment,
/// a value cannot be unquoted, or a required key is missing or invalid.
pub fn decode(text: &str) -> Result<ProgressRecord, ProgressError> {
    let mut values: HashMap<&str, String> = HashMap::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, raw) = line
            .split_once('=')
            .ok_or_else(|| ProgressError::Malformed(format!("line {}: expected KEY=value", number + 1)))?;
        let value = unquote(raw)
            .map_err(|e| ProgressError::Malformed(format!("line {}: {e}", number + 1)))?;
        values.insert(key.trim(), value);
    }

    let required = |key: &str| {
        values
            .get(key)
            .cloned()
            .ok_or_else(|| ProgressError::Malformed(format!("missing {key}")))
    };
    let flag = |key: &str| match values.get(key).map(String::as_str) {
        None | Some("false") => Ok(false),
        Some("true") => Ok(true),
        Some(other) => Err(ProgressError::Malformed(format!("{key}={other} is not a boolean"))),
    };

    let stage_raw = required(LAST_COMPLETED_STAGE)?;
    let last_completed_stage: usize = stage_raw
        .parse()
        .ok()
        .filter(|stage| *stage >= 1)
        .ok_or_else(|| {
            ProgressError::Malformed(format!("{LAST_COMPLETED_STAGE}={stage_raw} is not a stage index"))
        })?;
    let timestamp = parse_timestamp(&required(TIMESTAMP)?)
        .map_err(|e| ProgressError::Malformed(e.to_string()))?;

    Ok(ProgressRecord {
        last_completed_stage,
        last_completed_stage_name: required(LAST_COMPLETED_STAGE_NAME)?,
        configuration: Configuration {
            name: required(STACK_NAME)?,
            region: required(REGION)?,
            environment: required(ENVIRONMENT)?,
            profile: required(PROFILE)?,
            toggles: FeatureToggles {
                skip_prerequisites: flag(SKIP_PREREQUISITES)?,
                no_identifier_suffix: flag(NO_IDENTIFIER_SUFFIX)?,
            },
        },
        timestamp,
    })
}

fn unquote(raw: &str) -> Result<String, String> {
    let words = shell_words::split(raw).map_err(|e| e.to_string())?;
    match words.len() {
        0 => Ok(String::new()),
        1 => Ok(words.into_iter().next().unwrap_or_default()),
        _ => Err(format!("unquoted whitespace in value {raw}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn sample() -> ProgressRecord {
        ProgressRecord {
            last_completed_stage: 2,
            last_completed_stage_name: "Deploy infrastructure stack".to_string(),
            configuration: Configuration::new("demo-a1b2c3")
                .with_profile("ops team")
                .with_toggles(FeatureToggles {
                    skip_prerequisites: false,
                    no_identifier_suffix: true,
                }),
            timestamp: Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_encode_is_shell_assignable() {
        let text = encode(&sample());
        assert_eq!(
            text,
            "LAST_COMPLETED_STAGE=2\n\
             LAST_COMPLETED_STAGE_NAME='Deploy infrastructure stack'\n\
             STACK_NAME=demo-a1b2c3\n\
             REGION=us-east-1\n\
             ENVIRONMENT=dev\n\
             PROFILE='ops team'\n\
             SKIP_PREREQUISITES=false\n\
             NO_IDENTIFIER_SUFFIX=true\n\
             TIMESTAMP=2026-10-17T10:00:00.000000+00:00\n"
        );
    }

    #[test]
    fn test_decode_reads_what_encode_writes() {
        let record = sample();
        assert_eq!(decode(&encode(&record)).unwrap(), record);
    }

    #[test]
    fn test_decode_ignores_comments_and_unknown_keys() {
        let text = format!("# written by an older version\nEXTRA=1\n\n{}", encode(&sample()));
        assert_eq!(decode(&text).unwrap().last_completed_stage, 2);
    }

    #[test]
    fn test_decode_rejects_missing_key() {
        let text = encode(&sample()).replace("REGION=us-east-1\n", "");
        match decode(&text) {
            Err(ProgressError::Malformed(msg)) => assert_eq!(msg, "missing REGION"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_bad_stage_index() {
        for bad in ["LAST_COMPLETED_STAGE=zero", "LAST_COMPLETED_STAGE=0"] {
            let text = encode(&sample()).replace("LAST_COMPLETED_STAGE=2", bad);
            assert!(matches!(decode(&text), Err(ProgressError::Malformed(_))));
        }
    }

    #[test]
    fn test_decode_rejects_non_assignment() {
        assert!(matches!(decode("just some text"), Err(ProgressError::Malformed(_))));
    }
}
