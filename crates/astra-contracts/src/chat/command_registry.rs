#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "back",
        action: "back",
    },
    CommandSpec {
        command: "wait",
        action: "wait_viz",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

/// Commands addressing a transcript message by ordinal; the ordinal may
/// be omitted, in which case the latest assistant message is meant.
pub(crate) const OPTIONAL_ORDINAL_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "viz",
        action: "create_viz",
    },
    CommandSpec {
        command: "view",
        action: "view_viz",
    },
];

pub(crate) const REQUIRED_ORDINAL_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "expand",
    action: "toggle_expand",
}];

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "model",
    action: "set_viz_model",
}];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/viz",
    "/view",
    "/back",
    "/wait",
    "/expand",
    "/history",
    "/model",
    "/help",
];
