//! Tool-call fingerprinting (§3.4), shared by the loop detector (C4) and
//! the budget tracker / shared economics (C6, C7).

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Argument keys considered when deriving the fuzzy fingerprint, in the
/// fixed order the spec lists them.
const PRIMARY_ARG_KEYS: &[&str] = &[
    "path",
    "file_path",
    "command",
    "pattern",
    "query",
    "url",
    "content",
    "filename",
    "offset",
    "limit",
];

fn file_read_bash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(cat|head|tail|wc|less|more|file|stat|md5sum|sha256sum)\s+(\S+)\s*$").unwrap()
    })
}

/// `true` iff `command` contains a pipe or redirect, which disqualifies
/// it from the `bash:file_read:<path>` collapse.
fn has_pipe_or_redirect(command: &str) -> bool {
    command.contains('|') || command.contains('>') || command.contains('<')
}

/// Recursively sort object keys and serialise compactly, so that two
/// structurally-equal JSON values with differently-ordered keys produce
/// identical strings.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(k, _)| k.as_str());
            let mut sorted = serde_json::Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// The ordered subset of `args` present among [`PRIMARY_ARG_KEYS`],
/// canonicalised. Two argument sets that differ only in key order or in
/// keys outside this subset produce the same primary-arg fingerprint.
fn primary_args(args: &Value) -> Value {
    let mut subset = serde_json::Map::new();
    if let Value::Object(map) = args {
        for key in PRIMARY_ARG_KEYS {
            if let Some(v) = map.get(*key) {
                subset.insert(key.to_string(), v.clone());
            }
        }
    }
    Value::Object(subset)
}

/// Derive the fuzzy fingerprint for a tool call (§3.4): `tool` plus its
/// canonicalised primary-arg subset, with the `bash` file-read collapse
/// applied when it matches.
pub fn fingerprint(tool: &str, args: &Value) -> String {
    if tool == "bash" {
        if let Some(Value::String(command)) = args.get("command") {
            if !has_pipe_or_redirect(command) {
                if let Some(caps) = file_read_bash_re().captures(command.trim()) {
                    return format!("bash:file_read:{}", &caps[2]);
                }
            }
        }
    }
    format!("{tool}:{}", canonical_json(&primary_args(args)))
}

/// Full exact-match fingerprint: `tool` plus the complete canonicalised
/// argument object, used for [`crate::loop_detector::LoopDetector`]'s
/// exact tier.
pub fn exact_fingerprint(tool: &str, args: &Value) -> String {
    format!("{tool}:{}", canonical_json(args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_stable_under_key_reordering() {
        let a = json!({"path": "/x.ts", "offset": 0, "limit": 10});
        let b = json!({"limit": 10, "offset": 0, "path": "/x.ts"});
        assert_eq!(fingerprint("read_file", &a), fingerprint("read_file", &b));
    }

    #[test]
    fn fingerprint_ignores_non_primary_keys() {
        let a = json!({"path": "/x.ts", "extra": "ignored"});
        let b = json!({"path": "/x.ts"});
        assert_eq!(fingerprint("read_file", &a), fingerprint("read_file", &b));
    }

    #[test]
    fn bash_file_read_collapses_to_special_fingerprint() {
        let args = json!({"command": "cat /etc/hosts"});
        assert_eq!(fingerprint("bash", &args), "bash:file_read:/etc/hosts");
    }

    #[test]
    fn bash_with_pipe_does_not_collapse() {
        let args = json!({"command": "cat /etc/hosts | grep x"});
        assert_ne!(fingerprint("bash", &args), "bash:file_read:/etc/hosts");
    }

    #[test]
    fn exact_fingerprint_distinguishes_non_primary_keys() {
        let a = json!({"path": "/x.ts", "extra": "one"});
        let b = json!({"path": "/x.ts", "extra": "two"});
        assert_ne!(exact_fingerprint("read_file", &a), exact_fingerprint("read_file", &b));
    }
}
