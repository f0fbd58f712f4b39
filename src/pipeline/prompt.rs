//! Classification request construction.

use crate::config::RuleSet;
use crate::llm::provider::OracleRequest;
use crate::pipeline::types::Message;

/// First `max_chars` characters of `body`. Cuts on char boundaries.
pub fn truncate_body(body: &str, max_chars: usize) -> &str {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Quoted, comma-separated category list: `"A", "B", "C"`.
fn category_list(rules: &RuleSet) -> String {
    rules
        .categories
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the system role for a rule set.
pub fn build_system_prompt(rules: &RuleSet) -> String {
    format!(
        "We are an AI built to test whether an email meets criteria for user {}.",
        rules.requester
    )
}

/// Build the user prompt for one message.
pub fn build_user_prompt(rules: &RuleSet, message: &Message, max_body_chars: usize) -> String {
    let categories = category_list(rules);
    let body = truncate_body(&message.body, max_body_chars);
    let subject = &message.subject;
    let sender = &message.sender;

    let mut prompt = String::with_capacity(1024 + body.len());

    prompt.push_str("ONLY OUTPUT JSON. ALL OUTPUT IS IN JSON.\n");
    prompt.push_str("JSON FIELD INSTRUCTIONS:\n");
    prompt.push_str("meets_criteria = [true or false]\n");
    prompt.push_str(
        "explanation = Explain why the email does or does not meet the criteria defined below in the rules\n",
    );
    prompt.push_str(&format!("category = CHOOSE ONLY ONE OF [{categories}]\n\n"));

    prompt.push_str("<email>\n");
    prompt.push_str(&format!(
        "<subject>{subject}</subject> <sender>{sender}</sender> <body>{body}</body>\n"
    ));
    prompt.push_str("</email>\n\n");

    prompt.push_str("<rules>\n");
    prompt.push_str(&format!("\"meets_criteria\": true IF email is\n{}\n\n", rules.keep));
    prompt.push_str(&format!("\"meets_criteria\": false IF email is\n{}\n", rules.reject));
    prompt.push_str("</rules>\n\n");

    // Repeat the headers after the long body so they stay in focus.
    prompt.push_str(&format!(
        "<email>\n<subject>{subject}</subject> <sender>{sender}</sender>\n</email>\n\n"
    ));

    prompt.push_str(&format!("Categories CAN ONLY BE [{categories}]\n"));
    prompt.push_str(
        "OUTPUT JSON ONLY, DO NOT USE MARKDOWN, with exactly these three fields:\n\
         { \"meets_criteria\": false, \"explanation\": \"insert here\", \"category\": \"insert here\" }",
    );

    prompt
}

/// Build the full oracle request for one message.
pub fn build_request(
    rules: &RuleSet,
    message: &Message,
    max_body_chars: usize,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
) -> OracleRequest {
    OracleRequest::new(
        build_system_prompt(rules),
        build_user_prompt(rules, message, max_body_chars),
    )
    .with_temperature(temperature)
    .with_max_tokens(max_tokens)
}
