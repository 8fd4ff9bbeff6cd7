#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "image_model",
    action: "set_image_model",
}];

/// Whole-image operations whose argument is the prompt.
pub(crate) const PROMPT_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "filter",
        action: "filter",
    },
    CommandSpec {
        command: "adjust",
        action: "adjust",
    },
];

pub(crate) const POINT_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "edit",
        action: "edit",
    },
    CommandSpec {
        command: "hotspot",
        action: "set_hotspot",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "open",
        action: "open",
    },
    CommandSpec {
        command: "save",
        action: "save",
    },
];

pub(crate) const COMBINE_COMMAND: CommandSpec = CommandSpec {
    command: "combine",
    action: "combine",
};

pub(crate) const EXPAND_COMMAND: CommandSpec = CommandSpec {
    command: "expand",
    action: "expand",
};

pub(crate) const CROP_COMMAND: CommandSpec = CommandSpec {
    command: "crop",
    action: "crop",
};

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "undo",
        action: "undo",
    },
    CommandSpec {
        command: "redo",
        action: "redo",
    },
    CommandSpec {
        command: "original",
        action: "reset_to_original",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "credits",
        action: "credits",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const EDITOR_HELP_COMMANDS: &[&str] = &[
    "/edit <x> <y> <prompt>",
    "/hotspot <x> <y>",
    "/filter <prompt>",
    "/adjust <prompt>",
    "/combine <path> <prompt>",
    "/expand <top|bottom|left|right> [prompt]",
    "/crop <x> <y> <width> <height>",
    "/undo",
    "/redo",
    "/original",
    "/open <path>",
    "/save <path>",
    "/history",
    "/credits",
    "/image_model <name>",
    "/help",
    "/quit",
];
