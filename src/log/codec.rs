//! Bidirectional mapping between a sequence of [`Action`]s and a byte buffer
//! of newline-delimited JSON (spec §4.1).

use serde_json::Value as Json;

use crate::actions::Action;
use crate::error::{DeltaResult, Error};

const KNOWN_KEYS: &[&str] = &["add", "remove", "metaData", "protocol", "commitInfo"];

/// Parse a commit file's bytes into its action list. Trailing newlines and
/// CRLF are tolerated; empty lines are skipped.
pub fn parse_actions(bytes: &[u8]) -> DeltaResult<Vec<Action>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::malformed(format!("commit file is not valid utf-8: {e}")))?;
    let mut actions = Vec::new();
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        actions.push(parse_action_line(line)?);
    }
    Ok(actions)
}

fn parse_action_line(line: &str) -> DeltaResult<Action> {
    let value: Json = serde_json::from_str(line)?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::malformed("each log line must be a JSON object"))?;

    if obj.is_empty() {
        return Err(Error::malformed("action record has no recognized key"));
    }
    let unknown: Vec<&String> = obj
        .keys()
        .filter(|k| !KNOWN_KEYS.contains(&k.as_str()))
        .collect();
    if !unknown.is_empty() {
        return Err(Error::malformed(format!(
            "unknown top-level action key(s): {unknown:?}"
        )));
    }
    if obj.len() > 1 {
        return Err(Error::malformed(format!(
            "action record must carry exactly one action kind, found {}",
            obj.len()
        )));
    }

    let action: Action = serde_json::from_value(value).map_err(|e| {
        Error::malformed(format!("malformed action ({}): {e}", obj.keys().next().unwrap()))
    })?;
    action.validate()?;
    Ok(action)
}

/// Serialize actions to newline-delimited JSON, one action per line, no
/// trailing newline after the last record.
pub fn serialize_actions(actions: &[Action]) -> DeltaResult<Vec<u8>> {
    let mut out = String::new();
    for (i, action) in actions.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&serde_json::to_string(action)?);
    }
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Add, CommitInfo, Format, Metadata, Protocol};
    use std::collections::HashMap;

    fn sample_actions() -> Vec<Action> {
        vec![
            Action::Protocol(Protocol {
                min_reader_version: 1,
                min_writer_version: 1,
                reader_features: None,
                writer_features: None,
            }),
            Action::Metadata(Metadata {
                id: "11111111-1111-1111-1111-111111111111".to_string(),
                name: None,
                description: None,
                format: Format {
                    provider: "parquet".to_string(),
                    options: HashMap::new(),
                },
                schema_string: r#"{"type":"struct","fields":[{"name":"id","type":"string","nullable":true,"metadata":{}}]}"#.to_string(),
                partition_columns: vec![],
                configuration: HashMap::new(),
                created_time: Some(0),
            }),
            Action::Add(Add {
                path: "part-00000.parquet".to_string(),
                partition_values: HashMap::new(),
                size: 10,
                modification_time: 0,
                data_change: true,
                stats: None,
                deletion_vector: None,
                tags: None,
            }),
            Action::CommitInfo(CommitInfo::new(0, "WRITE", None)),
        ]
    }

    #[test]
    fn round_trips_actions() {
        // P2: parse(serialize(A)) == A for any valid action.
        let actions = sample_actions();
        let bytes = serialize_actions(&actions).unwrap();
        let parsed = parse_actions(&bytes).unwrap();
        assert_eq!(actions, parsed);
    }

    #[test]
    fn tolerates_trailing_newlines_and_crlf() {
        let actions = sample_actions();
        let mut bytes = serialize_actions(&actions).unwrap();
        bytes.extend_from_slice(b"\r\n\r\n");
        let parsed = parse_actions(&bytes).unwrap();
        assert_eq!(actions, parsed);
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let err = parse_actions(br#"{"bogus": {}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_multiple_keys_in_one_record() {
        let err = parse_actions(br#"{"add": {}, "remove": {}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = parse_actions(br#"{"protocol": {"minWriterVersion": 1}}"#);
        assert!(err.is_err());
    }
}
