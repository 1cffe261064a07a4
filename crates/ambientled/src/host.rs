//! Console host: the terminal stands in for a home-automation platform.

use std::io::{self, Write};

use ambientled_core::{Host, LightEntity};

use crate::output;

/// Prints entity events when `echo` is set; otherwise only traces them.
pub struct ConsoleHost {
    echo: bool,
    color: bool,
}

impl ConsoleHost {
    pub fn new(echo: bool, color: bool) -> Self {
        Self { echo, color }
    }

    fn emit(&self, line: &str) {
        if self.echo {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
        }
    }
}

impl Host for ConsoleHost {
    fn add_entities(&self, entities: Vec<LightEntity>) {
        tracing::debug!(count = entities.len(), "entities added");
        for entity in &entities {
            self.emit(&format!("+ {}", output::describe(entity, self.color)));
        }
    }

    fn write_state(&self, entity: &LightEntity) {
        tracing::debug!(entity = %entity.unique_id, is_on = entity.is_on, "state written");
        self.emit(&format!("~ {}", output::describe(entity, self.color)));
    }

    fn remove_entity(&self, unique_id: &str) {
        tracing::debug!(entity = unique_id, "entity removed");
        self.emit(&format!("- {unique_id}"));
    }

    fn raise_reauth(&self, reason: &str) {
        tracing::warn!(reason, "backend rejected the token");
        self.emit(&format!("! reauthentication required: {reason}"));
    }

    fn clear_reauth(&self) {
        tracing::debug!("reauth cleared");
    }
}
