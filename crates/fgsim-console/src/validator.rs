use crate::actions::Action;
use fgsim_core::actions::WhichReply;
use fgsim_core::ActionError;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub valid: bool,
    /// Resolved path when valid, the server's reason when not.
    pub message: Option<String>,
}

/// Last known `which` verdict per command string.
#[derive(Debug, Default)]
pub struct ExecutableValidator {
    verdicts: HashMap<String, Verdict>,
}

impl ExecutableValidator {
    pub fn check(&self, cmd: &str) -> Action {
        Action::Which {
            cmd: cmd.to_string(),
        }
    }

    pub fn on_checked(&mut self, cmd: &str, result: &Result<WhichReply, ActionError>) {
        let verdict = match result {
            Ok(reply) => Verdict {
                valid: true,
                message: Some(reply.path.clone()),
            },
            Err(err) => Verdict {
                valid: false,
                message: Some(err.reason.clone()),
            },
        };
        self.verdicts.insert(cmd.to_string(), verdict);
    }

    /// Unchecked commands are not valid.
    pub fn is_valid(&self, cmd: &str) -> bool {
        self.verdicts.get(cmd).is_some_and(|verdict| verdict.valid)
    }

    pub fn verdict(&self, cmd: &str) -> Option<&Verdict> {
        self.verdicts.get(cmd)
    }

    /// Validation error shown next to the command; cleared by a successful check.
    pub fn error_message(&self, cmd: &str) -> Option<&str> {
        self.verdicts
            .get(cmd)
            .filter(|verdict| !verdict.valid)
            .and_then(|verdict| verdict.message.as_deref())
    }
}
