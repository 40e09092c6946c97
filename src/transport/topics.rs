use crate::domain::SYSTEM_LABEL;

/// Where an inbound command arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTopic {
    System,
    Area(String),
}

impl CommandTopic {
    pub fn area(&self) -> Option<&str> {
        match self {
            CommandTopic::System => None,
            CommandTopic::Area(area) => Some(area),
        }
    }
}

/// Topic scheme rooted at a configurable prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn reading(&self, area: &str) -> String {
        format!("{}/{}/consumo", self.prefix, area)
    }

    pub fn summary(&self) -> String {
        format!("{}/summary", self.prefix)
    }

    pub fn status(&self) -> String {
        self.system("status")
    }

    pub fn relay_ack(&self) -> String {
        self.system("relay_ack")
    }

    pub fn relay_status(&self) -> String {
        self.system("relay_status")
    }

    pub fn config_ack(&self) -> String {
        self.system("config_ack")
    }

    pub fn area_commands(&self) -> String {
        format!("{}/+/comando", self.prefix)
    }

    pub fn system_commands(&self) -> String {
        self.system("comando")
    }

    /// Filters the command handler subscribes to
    pub fn command_filters(&self) -> [String; 2] {
        [self.system_commands(), self.area_commands()]
    }

    /// Classify `{prefix}/{area}/comando`; anything else is `None`
    pub fn parse_command_topic(&self, topic: &str) -> Option<CommandTopic> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        let area = rest.strip_suffix("/comando")?;
        if area.is_empty() || area.contains('/') {
            return None;
        }
        if area == SYSTEM_LABEL {
            Some(CommandTopic::System)
        } else {
            Some(CommandTopic::Area(area.to_string()))
        }
    }

    fn system(&self, leaf: &str) -> String {
        format!("{}/{}/{}", self.prefix, SYSTEM_LABEL, leaf)
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new("edificio")
    }
}
