//! Chat templates used to render single-turn LLaVA prompts.

use anyhow::{Result, bail};

pub const DEFAULT_TEMPLATE: &str = "llava_v1";

const VICUNA_SYSTEM: &str = "A chat between a curious human and an artificial intelligence assistant. The assistant gives helpful, detailed, and polite answers to the human's questions.";

const MPT_SYSTEM: &str = "<|im_start|>system\nA conversation between a user and an LLM-based AI assistant. The assistant gives helpful and honest answers.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparatorStyle {
    Single,
    Two,
    Mpt,
    Plain,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub name: String,
    pub system: String,
    pub roles: (String, String),
    pub messages: Vec<(String, Option<String>)>,
    pub style: SeparatorStyle,
    pub sep: String,
    pub sep2: Option<String>,
}

impl Conversation {
    pub fn user_role(&self) -> &str {
        &self.roles.0
    }

    pub fn assistant_role(&self) -> &str {
        &self.roles.1
    }

    pub fn set_system_message(&mut self, system: String) {
        self.system = system;
    }

    pub fn reset_messages(&mut self) {
        self.messages.clear();
    }

    /// `None` leaves an open slot for the model to fill.
    pub fn append_message(&mut self, role: &str, message: Option<String>) {
        self.messages.push((role.to_owned(), message));
    }

    /// The sequence the model emits when it has finished its turn.
    pub fn stop_str(&self) -> &str {
        match self.style {
            SeparatorStyle::Two => self.sep2.as_deref().unwrap_or(&self.sep),
            _ => &self.sep,
        }
    }

    pub fn get_prompt(&self) -> String {
        match self.style {
            SeparatorStyle::Single => {
                let mut ret = format!("{}{}", self.system, self.sep);
                for (role, message) in &self.messages {
                    match message {
                        Some(message) => {
                            ret.push_str(&format!("{role}: {message}{}", self.sep));
                        }
                        None => ret.push_str(&format!("{role}:")),
                    }
                }
                ret
            }
            SeparatorStyle::Two => {
                let seps = [self.sep.as_str(), self.stop_str()];
                let mut ret = format!("{}{}", self.system, seps[0]);
                for (idx, (role, message)) in self.messages.iter().enumerate() {
                    match message {
                        Some(message) => {
                            ret.push_str(&format!("{role}: {message}{}", seps[idx % 2]));
                        }
                        None => ret.push_str(&format!("{role}:")),
                    }
                }
                ret
            }
            SeparatorStyle::Mpt => {
                let mut ret = format!("{}{}", self.system, self.sep);
                for (role, message) in &self.messages {
                    match message {
                        Some(message) => ret.push_str(&format!("{role}{message}{}", self.sep)),
                        None => ret.push_str(role),
                    }
                }
                ret
            }
            SeparatorStyle::Plain => {
                let sep2 = self.sep2.as_deref().unwrap_or(&self.sep);
                let seps = [self.sep.as_str(), sep2];
                let mut ret = self.system.clone();
                for (idx, (_, message)) in self.messages.iter().enumerate() {
                    if let Some(message) = message {
                        ret.push_str(message);
                        ret.push_str(seps[idx % 2]);
                    }
                }
                ret
            }
        }
    }
}

pub fn known_templates() -> &'static [&'static str] {
    &["llava_v0", "llava_v1", "vicuna_v1", "mpt", "plain"]
}

pub fn get_conv_template(name: &str) -> Result<Conversation> {
    let conv = match name {
        "llava_v0" => Conversation {
            name: name.to_owned(),
            system: VICUNA_SYSTEM.to_owned(),
            roles: ("Human".to_owned(), "Assistant".to_owned()),
            messages: Vec::new(),
            style: SeparatorStyle::Single,
            sep: "###".to_owned(),
            sep2: None,
        },
        "llava_v1" | "vicuna_v1" => Conversation {
            name: name.to_owned(),
            system: VICUNA_SYSTEM.to_owned(),
            roles: ("USER".to_owned(), "ASSISTANT".to_owned()),
            messages: Vec::new(),
            style: SeparatorStyle::Two,
            sep: " ".to_owned(),
            sep2: Some("</s>".to_owned()),
        },
        "mpt" => Conversation {
            name: name.to_owned(),
            system: MPT_SYSTEM.to_owned(),
            roles: (
                "<|im_start|>user\n".to_owned(),
                "<|im_start|>assistant\n".to_owned(),
            ),
            messages: Vec::new(),
            style: SeparatorStyle::Mpt,
            sep: "<|im_end|>".to_owned(),
            sep2: None,
        },
        "plain" => Conversation {
            name: name.to_owned(),
            system: String::new(),
            roles: (String::new(), String::new()),
            messages: Vec::new(),
            style: SeparatorStyle::Plain,
            sep: "\n".to_owned(),
            sep2: None,
        },
        other => bail!(
            "unknown conversation template `{other}` (expected one of {})",
            known_templates().join(", ")
        ),
    };
    Ok(conv)
}

/// Render a single-turn prompt: the user message followed by an open
/// assistant slot.
pub fn render_single_turn(template: &str, user_message: &str) -> Result<(String, String)> {
    let mut conv = get_conv_template(template)?;
    conv.reset_messages();
    let user = conv.user_role().to_owned();
    let assistant = conv.assistant_role().to_owned();
    conv.append_message(&user, Some(user_message.to_owned()));
    conv.append_message(&assistant, None);
    Ok((conv.get_prompt(), conv.stop_str().to_owned()))
}
