use std::sync::Arc;

use crate::context::Origin;
use crate::diagnostics::Diagnostic;

/// What kind of entity is invoking a command or callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    Player,
    Server,
    Other,
}

/// The entity on whose behalf the host runs code
pub trait Principal: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> PrincipalKind;

    /// Whether the principal holds at least `level` (1-4)
    fn has_permission(&self, level: u8) -> bool;

    fn send_message(&self, message: &str);

    /// Whether error reports should be sent here rather than to the log.
    /// Only players read chat by default.
    fn accepts_diagnostics(&self) -> bool {
        self.is_player()
    }

    /// Deliver a composed error report. Defaults to one message per line.
    fn send_diagnostic(&self, diagnostic: &Diagnostic) {
        for line in diagnostic.render_lines() {
            self.send_message(&line);
        }
    }

    /// Where code run on behalf of this principal originates
    fn origin(&self) -> Origin {
        Origin::ZERO
    }

    /// Whether the caller is on the simulation thread
    fn on_simulation_thread(&self) -> bool {
        true
    }

    fn is_player(&self) -> bool {
        self.kind() == PrincipalKind::Player
    }
}

pub type PrincipalRef = Arc<dyn Principal>;

/// Code may only run synchronously from the simulation thread
pub fn can_synchronously_execute(principal: &dyn Principal) -> bool {
    principal.on_simulation_thread()
}
