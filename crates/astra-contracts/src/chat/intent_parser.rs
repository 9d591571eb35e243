use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, OPTIONAL_ORDINAL_COMMANDS, RAW_ARG_COMMANDS,
    REQUIRED_ORDINAL_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    /// Chat text for `chat_send`; absent for slash commands.
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

    pub fn ordinal(&self) -> Option<usize> {
        self.command_args
            .get("ordinal")
            .and_then(Value::as_u64)
            .map(|value| value as usize)
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

/// Parse one line of REPL input into an intent. Plain text becomes a
/// `chat_send`; `/`-prefixed input is matched against the command
/// registry; blank input and unknown commands resolve to `noop` /
/// `unknown` so the caller can branch without error handling.
pub fn parse_intent(input: &str) -> Intent {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Intent::new("noop", input);
    }

    let Some(body) = trimmed.strip_prefix('/') else {
        let mut intent = Intent::new("chat_send", input);
        intent.prompt = Some(trimmed.to_string());
        return intent;
    };

    let (command, arg) = match body.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (body, ""),
    };
    let command = command.to_ascii_lowercase();

    if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
        return Intent::new(action, input);
    }

    if let Some(action) = find_action(&command, OPTIONAL_ORDINAL_COMMANDS) {
        let mut intent = Intent::new(action, input);
        if let Some(ordinal) = parse_ordinal(arg) {
            intent
                .command_args
                .insert("ordinal".to_string(), Value::Number(ordinal.into()));
        } else if !arg.is_empty() {
            return Intent::new("unknown", input);
        }
        return intent;
    }

    if let Some(action) = find_action(&command, REQUIRED_ORDINAL_COMMANDS) {
        let Some(ordinal) = parse_ordinal(arg) else {
            return Intent::new("unknown", input);
        };
        let mut intent = Intent::new(action, input);
        intent
            .command_args
            .insert("ordinal".to_string(), Value::Number(ordinal.into()));
        return intent;
    }

    if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
        let mut intent = Intent::new(action, input);
        if !arg.is_empty() {
            intent
                .command_args
                .insert("value".to_string(), Value::String(arg.to_string()));
        }
        return intent;
    }

    Intent::new("unknown", input)
}

fn parse_ordinal(arg: &str) -> Option<u64> {
    let trimmed = arg.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_is_a_chat_send() {
        let intent = parse_intent("  show me last quarter's numbers  ");
        assert_eq!(intent.action, "chat_send");
        assert_eq!(
            intent.prompt.as_deref(),
            Some("show me last quarter's numbers")
        );
    }

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("").action, "noop");
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn viz_without_ordinal_targets_latest() {
        let intent = parse_intent("/viz");
        assert_eq!(intent.action, "create_viz");
        assert_eq!(intent.ordinal(), None);
    }

    #[test]
    fn viz_with_ordinal() {
        let intent = parse_intent("/viz 3");
        assert_eq!(intent.action, "create_viz");
        assert_eq!(intent.ordinal(), Some(3));
    }

    #[test]
    fn viz_with_garbage_arg_is_unknown() {
        assert_eq!(parse_intent("/viz three").action, "unknown");
    }

    #[test]
    fn view_and_back_round_out_navigation() {
        assert_eq!(parse_intent("/view 2").action, "view_viz");
        assert_eq!(parse_intent("/back").action, "back");
        assert_eq!(parse_intent("/wait").action, "wait_viz");
    }

    #[test]
    fn expand_requires_an_ordinal() {
        assert_eq!(parse_intent("/expand").action, "unknown");
        let intent = parse_intent("/expand 4");
        assert_eq!(intent.action, "toggle_expand");
        assert_eq!(intent.ordinal(), Some(4));
    }

    #[test]
    fn model_keeps_the_raw_value() {
        let intent = parse_intent("/model gemini-2.5-pro");
        assert_eq!(intent.action, "set_viz_model");
        assert_eq!(intent.command_args.get("value"), Some(&json!("gemini-2.5-pro")));
    }

    #[test]
    fn commands_are_case_insensitive() {
        assert_eq!(parse_intent("/HELP").action, "help");
        assert_eq!(parse_intent("/Viz 1").action, "create_viz");
    }

    #[test]
    fn unknown_command_is_flagged() {
        assert_eq!(parse_intent("/frobnicate").action, "unknown");
    }
}
