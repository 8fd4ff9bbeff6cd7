use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, COMBINE_COMMAND, CROP_COMMAND, EXPAND_COMMAND, NO_ARG_COMMANDS, POINT_COMMANDS,
    PROMPT_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
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

    fn invalid(raw: &str, command: &str, message: String) -> Self {
        let mut intent = Self::new("invalid", raw);
        intent
            .command_args
            .insert("command".to_string(), Value::String(command.to_string()));
        intent
            .command_args
            .insert("error".to_string(), Value::String(message));
        intent
    }

    fn with_prompt(mut self, prompt: String) -> Self {
        let trimmed = prompt.trim();
        if !trimmed.is_empty() {
            self.prompt = Some(trimmed.to_string());
        }
        self
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args.get(key).and_then(Value::as_str)
    }

    pub fn arg_u32(&self, key: &str) -> Option<u32> {
        self.command_args
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|value| u32::try_from(value).ok())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_words(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

/// Splits off `count` leading words; the remainder is re-joined as free text.
fn split_leading(arg: &str, count: usize) -> Option<(Vec<String>, String)> {
    let mut words = parse_words(arg);
    if words.len() < count {
        return None;
    }
    let rest = words.split_off(count);
    Some((words, rest.join(" ")))
}

fn parse_coords(words: &[String]) -> Option<Vec<u32>> {
    words
        .iter()
        .map(|word| word.trim_end_matches(',').parse::<u32>().ok())
        .collect()
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_words(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
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
                    .insert("model".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, PROMPT_COMMANDS) {
                return Intent::new(action, text).with_prompt(arg.to_string());
            }

            if let Some(action) = find_action(&command, POINT_COMMANDS) {
                let parsed = split_leading(arg, 2)
                    .and_then(|(words, rest)| parse_coords(&words).map(|coords| (coords, rest)));
                let Some((coords, rest)) = parsed else {
                    return Intent::invalid(
                        text,
                        &command,
                        format!("/{command} needs x and y pixel coordinates"),
                    );
                };
                let mut intent = Intent::new(action, text).with_prompt(rest);
                intent
                    .command_args
                    .insert("x".to_string(), Value::from(coords[0]));
                intent
                    .command_args
                    .insert("y".to_string(), Value::from(coords[1]));
                return intent;
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let path = parse_single_path_arg(arg);
                if path.is_empty() {
                    return Intent::invalid(text, &command, format!("/{command} requires a path"));
                }
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("path".to_string(), Value::String(path));
                return intent;
            }

            if command == COMBINE_COMMAND.command {
                let Some((words, rest)) = split_leading(arg, 1) else {
                    return Intent::invalid(
                        text,
                        &command,
                        "/combine requires an image path".to_string(),
                    );
                };
                let mut intent = Intent::new(COMBINE_COMMAND.action, text).with_prompt(rest);
                intent
                    .command_args
                    .insert("path".to_string(), Value::String(words[0].clone()));
                return intent;
            }

            if command == EXPAND_COMMAND.command {
                let Some((words, rest)) = split_leading(arg, 1) else {
                    return Intent::invalid(
                        text,
                        &command,
                        "/expand requires a direction".to_string(),
                    );
                };
                let mut intent = Intent::new(EXPAND_COMMAND.action, text).with_prompt(rest);
                intent.command_args.insert(
                    "direction".to_string(),
                    Value::String(words[0].to_ascii_lowercase()),
                );
                return intent;
            }

            if command == CROP_COMMAND.command {
                let coords = split_leading(arg, 4).and_then(|(words, _)| parse_coords(&words));
                let Some(coords) = coords else {
                    return Intent::invalid(
                        text,
                        &command,
                        "/crop needs x, y, width and height".to_string(),
                    );
                };
                let mut intent = Intent::new(CROP_COMMAND.action, text);
                for (key, value) in ["x", "y", "width", "height"].into_iter().zip(coords) {
                    intent
                        .command_args
                        .insert(key.to_string(), Value::from(value));
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

    Intent::new("edit_at_hotspot", text).with_prompt(raw_trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn parse_edit_with_coordinates_and_prompt() {
        let intent = parse_intent("/edit 120 45 make the shirt blue");
        assert_eq!(intent.action, "edit");
        assert_eq!(intent.arg_u32("x"), Some(120));
        assert_eq!(intent.arg_u32("y"), Some(45));
        assert_eq!(intent.prompt.as_deref(), Some("make the shirt blue"));
    }

    #[test]
    fn parse_edit_accepts_comma_separated_point() {
        let intent = parse_intent("/edit 10, 20 remove the sign");
        assert_eq!(intent.action, "edit");
        assert_eq!(intent.command_args["x"], json!(10));
        assert_eq!(intent.command_args["y"], json!(20));
    }

    #[test]
    fn parse_edit_without_coordinates_is_invalid() {
        let intent = parse_intent("/edit make it pop");
        assert_eq!(intent.action, "invalid");
        assert_eq!(intent.command_args["command"], json!("edit"));
    }

    #[test]
    fn parse_hotspot_without_prompt() {
        let intent = parse_intent("/hotspot 3 4");
        assert_eq!(intent.action, "set_hotspot");
        assert_eq!(intent.arg_u32("x"), Some(3));
        assert!(intent.prompt.is_none());
    }

    #[test]
    fn parse_prompt_commands() {
        let filter = parse_intent("/filter  80s synthwave ");
        assert_eq!(filter.action, "filter");
        assert_eq!(filter.prompt.as_deref(), Some("80s synthwave"));

        let adjust = parse_intent("/adjust");
        assert_eq!(adjust.action, "adjust");
        assert!(adjust.prompt.is_none());
    }

    #[test]
    fn parse_combine_quoted_path() {
        let intent = parse_intent("/combine \"/tmp/my dog.png\" put the dog on the sofa");
        assert_eq!(intent.action, "combine");
        assert_eq!(intent.arg_str("path"), Some("/tmp/my dog.png"));
        assert_eq!(intent.prompt.as_deref(), Some("put the dog on the sofa"));
    }

    #[test]
    fn parse_expand_direction_and_optional_prompt() {
        let intent = parse_intent("/expand LEFT more beach");
        assert_eq!(intent.action, "expand");
        assert_eq!(intent.arg_str("direction"), Some("left"));
        assert_eq!(intent.prompt.as_deref(), Some("more beach"));

        let bare = parse_intent("/expand top");
        assert_eq!(bare.arg_str("direction"), Some("top"));
        assert!(bare.prompt.is_none());

        assert_eq!(parse_intent("/expand").action, "invalid");
    }

    #[test]
    fn parse_crop_rect() {
        let intent = parse_intent("/crop 0 10 200 100");
        assert_eq!(intent.action, "crop");
        assert_eq!(intent.arg_u32("width"), Some(200));
        assert_eq!(intent.arg_u32("height"), Some(100));
        assert_eq!(parse_intent("/crop 1 2 3").action, "invalid");
    }

    #[test]
    fn parse_path_and_navigation_commands() {
        let open = parse_intent("/open \"/tmp/a b.png\"");
        assert_eq!(open.action, "open");
        assert_eq!(open.command_args["path"], json!("/tmp/a b.png"));
        assert_eq!(parse_intent("/save").action, "invalid");

        assert_eq!(parse_intent("/undo").action, "undo");
        assert_eq!(parse_intent("/REDO").action, "redo");
        assert_eq!(parse_intent("/original").action, "reset_to_original");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn parse_image_model_command() {
        let intent = parse_intent("/image_model dryrun-image-1");
        assert_eq!(intent.action, "set_image_model");
        assert_eq!(intent.command_args["model"], json!("dryrun-image-1"));
    }

    #[test]
    fn bare_text_edits_at_stored_hotspot() {
        let intent = parse_intent("  remove the red car ");
        assert_eq!(intent.action, "edit_at_hotspot");
        assert_eq!(intent.prompt.as_deref(), Some("remove the red car"));
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
