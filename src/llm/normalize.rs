//! Reply normalization and structured parsing.
//!
//! Oracles decorate JSON with typographic quotes, markdown fences and
//! escaped underscores. Those are rewritten to plain ASCII first, then the
//! single JSON object is cut out and deserialized.

use serde::Deserialize;

use crate::error::ParseError;

/// The three fields every classification reply must carry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OracleReply {
    #[serde(alias = "judgment")]
    pub meets_criteria: bool,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub category: String,
}

/// Rewrite oracle text formatting into JSON-safe ASCII.
///
/// Backticks become single quotes, so a ```` ```json ```` fence turns into
/// `'''json` and is removed together with the closing `'''`.
pub fn normalize_reply(raw: &str) -> String {
    raw.replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('`', "'")
        .replace("\\_", "_")
        .replace("'''json\n", "")
        .replace("'''json", "")
        .replace("'''", "")
}

/// Cut the outermost `{ ... }` out of surrounding prose, before or after.
fn extract_json_object(text: &str) -> &str {
    let trimmed = text.trim();
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return &trimmed[start..=end];
    }
    trimmed
}

/// Normalize and parse a raw reply.
pub fn parse_reply(raw: &str) -> Result<OracleReply, ParseError> {
    let normalized = normalize_reply(raw);
    let json = extract_json_object(&normalized);
    serde_json::from_str(json).map_err(|e| ParseError::InvalidJson {
        reason: e.to_string(),
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_smart_quotes() {
        assert_eq!(
            normalize_reply("{\u{201C}category\u{201D}: \u{2018}x\u{2019}}"),
            "{\"category\": 'x'}"
        );
    }

    #[test]
    fn normalize_escaped_underscores() {
        assert_eq!(normalize_reply("meets\\_criteria"), "meets_criteria");
    }

    #[test]
    fn parse_plain_json() {
        let reply = parse_reply(
            r#"{ "meets_criteria": false, "explanation": "bulk mail", "category": "Newsletter" }"#,
        )
        .unwrap();
        assert!(!reply.meets_criteria);
        assert_eq!(reply.category, "Newsletter");
        assert_eq!(reply.explanation, "bulk mail");
    }

    #[test]
    fn parse_triple_quote_fence() {
        let raw = "'''json\n{ \"meets_criteria\": true, \"explanation\": \"receipt\", \"category\": \"Finance\" }\n'''";
        let reply = parse_reply(raw).unwrap();
        assert!(reply.meets_criteria);
        assert_eq!(reply.category, "Finance");
    }

    #[test]
    fn parse_markdown_fence() {
        let raw = "```json\n{\"meets_criteria\": true, \"explanation\": \"ok\", \"category\": \"Work\"}\n```";
        let reply = parse_reply(raw).unwrap();
        assert!(reply.meets_criteria);
        assert_eq!(reply.category, "Work");
    }

    #[test]
    fn parse_smart_quoted_json() {
        let raw = "{\u{201C}meets\\_criteria\u{201D}: false, \u{201C}explanation\u{201D}: \u{201C}promo\u{201D}, \u{201C}category\u{201D}: \u{201C}Deals\u{201D}}";
        let reply = parse_reply(raw).unwrap();
        assert!(!reply.meets_criteria);
        assert_eq!(reply.category, "Deals");
    }

    #[test]
    fn parse_object_inside_prose() {
        let raw = "Here is my answer: {\"meets_criteria\": true, \"explanation\": \"x\", \"category\": \"Finance\"} Hope that helps.";
        assert!(parse_reply(raw).unwrap().meets_criteria);
    }

    #[test]
    fn parse_object_followed_by_prose() {
        let raw = "{\"meets_criteria\": true, \"explanation\": \"receipt\", \"category\": \"Finance\"}\nHope that helps.";
        let reply = parse_reply(raw).unwrap();
        assert!(reply.meets_criteria);
        assert_eq!(reply.category, "Finance");
    }

    #[test]
    fn parse_judgment_alias() {
        let raw = r#"{"judgment": false, "explanation": "x", "category": "Spam"}"#;
        assert!(!parse_reply(raw).unwrap().meets_criteria);
    }

    #[test]
    fn mismatched_braces_is_parse_error() {
        let raw = "{ \"meets_criteria\": true, \"explanation\": \"x\", \"category\": \"Finance\" ";
        let err = parse_reply(raw).unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson { .. }));
        assert_eq!(err.raw(), raw);
    }

    #[test]
    fn missing_judgment_is_parse_error() {
        assert!(parse_reply(r#"{"explanation": "x", "category": "Finance"}"#).is_err());
    }

    #[test]
    fn non_boolean_judgment_is_parse_error() {
        assert!(parse_reply(r#"{"meets_criteria": "maybe", "category": "Finance"}"#).is_err());
    }

    #[test]
    fn empty_reply_is_parse_error() {
        assert!(parse_reply("").is_err());
    }
}
