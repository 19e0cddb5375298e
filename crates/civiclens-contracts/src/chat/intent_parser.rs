use std::collections::BTreeMap;

use serde_json::{Number, Value};

use super::command_registry::{
    CommandSpec, COORDINATE_COMMANDS, NO_ARG_COMMANDS, RAW_ARG_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_coordinate_args(arg: &str) -> Option<(f64, f64)> {
    let parts: Vec<&str> = arg
        .split([' ', ','])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();
    if parts.len() != 2 {
        return None;
    }
    let lat = parts[0].parse::<f64>().ok()?;
    let lng = parts[1].parse::<f64>().ok()?;
    if !lat.is_finite() || !lng.is_finite() {
        return None;
    }
    Some((lat, lng))
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("query".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, COORDINATE_COMMANDS) {
                let mut intent = Intent::new(action, text);
                if let Some((lat, lng)) = parse_coordinate_args(arg) {
                    if let (Some(lat), Some(lng)) =
                        (Number::from_f64(lat), Number::from_f64(lng))
                    {
                        intent
                            .command_args
                            .insert("lat".to_string(), Value::Number(lat));
                        intent
                            .command_args
                            .insert("lng".to_string(), Value::Number(lng));
                    }
                }
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("message", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn parse_search_keeps_raw_query() {
        let intent = parse_intent("/search pothole complaint process");
        assert_eq!(intent.action, "search");
        assert_eq!(
            intent.command_args["query"],
            json!("pothole complaint process")
        );
    }

    #[test]
    fn parse_geocode_coordinates() {
        let intent = parse_intent("/geocode 12.9716 77.5946");
        assert_eq!(intent.action, "geocode");
        assert_eq!(intent.command_args["lat"], json!(12.9716));
        assert_eq!(intent.command_args["lng"], json!(77.5946));

        let comma = parse_intent("/geocode 12.9716, 77.5946");
        assert_eq!(comma.command_args["lat"], json!(12.9716));
    }

    #[test]
    fn malformed_geocode_omits_coordinates() {
        let intent = parse_intent("/geocode downtown");
        assert_eq!(intent.action, "geocode");
        assert!(!intent.command_args.contains_key("lat"));

        let single = parse_intent("/geocode 12.9716");
        assert!(!single.command_args.contains_key("lat"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/help").action, "help");
        assert_eq!(parse_intent("/quit").action, "quit");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }

    #[test]
    fn plain_text_becomes_a_message() {
        let intent = parse_intent("  how do I report a pothole?  ");
        assert_eq!(intent.action, "message");
        assert_eq!(
            intent.prompt.as_deref(),
            Some("how do I report a pothole?")
        );
    }

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
        assert_eq!(parse_intent("").action, "noop");
    }
}
