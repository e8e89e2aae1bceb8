use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

static FENCED: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap());
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());

fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}

/// Parse a model reply that should be JSON but may be wrapped in prose or a
/// code fence, or carry trailing commas and single quotes.
///
/// A blank reply decodes to an empty object.
pub fn decode_reply(reply: &str) -> Result<Value> {
    let cleaned = reply.trim();
    if cleaned.is_empty() {
        debug!("blank reply treated as an empty partial");
        return Ok(Value::Object(Map::new()));
    }
    if let Ok(value) = serde_json::from_str(cleaned) {
        return Ok(value);
    }
    if let Some(body) = FENCED.captures(cleaned).and_then(|caps| caps.get(1)) {
        if let Ok(value) = serde_json::from_str(body.as_str()) {
            return Ok(value);
        }
    }
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if end > start {
            let slice = &cleaned[start..=end];
            if let Ok(value) = serde_json::from_str(slice) {
                return Ok(value);
            }
            let repaired = TRAILING_COMMA.replace_all(slice, "$1").replace('\'', "\"");
            if let Ok(value) = serde_json::from_str(&repaired) {
                debug!("reply needed repair before decoding");
                return Ok(value);
            }
        }
    }
    bail!("reply is not JSON: {}", preview(cleaned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_json() {
        assert_eq!(decode_reply(" {\"a\": 1} ").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn fenced_block() {
        let reply = "Here you go:\n```json\n{\"basic_info\": {\"model_main\": \"M1\"}}\n```";
        assert_eq!(
            decode_reply(reply).unwrap(),
            json!({"basic_info": {"model_main": "M1"}})
        );
    }

    #[test]
    fn outermost_braces_in_prose() {
        let reply = "Result: {\"a\": {\"b\": 2}} done";
        assert_eq!(decode_reply(reply).unwrap(), json!({"a": {"b": 2}}));
    }

    #[test]
    fn trailing_commas_and_single_quotes_are_repaired() {
        let reply = "{'series_models': [{'model': 'M1',},],}";
        assert_eq!(
            decode_reply(reply).unwrap(),
            json!({"series_models": [{"model": "M1"}]})
        );
    }

    #[test]
    fn blank_reply_is_empty_object() {
        assert_eq!(decode_reply("  \n").unwrap(), json!({}));
    }

    #[test]
    fn garbage_fails() {
        let err = decode_reply("I could not find anything.").unwrap_err();
        assert!(err.to_string().starts_with("reply is not JSON"));
        assert!(decode_reply("} nope {").is_err());
    }
}
