//! Command dispatch: dimension switches and the built-in commands.
//!
//! A command name is first looked up in the [`RoutingDirectory`]; only if it
//! names no dimension is it matched against the closed set of built-ins.

use std::sync::Arc;
use std::time::Duration;

use dimensions_net::Rgb;

use crate::command::{Command, DEFAULT_MARKER};
use crate::directory::{Backend, RoutingDirectory};
use crate::migrate;
use crate::session::{Lifecycle, Notice, Session};

/// Default delay before the `who` reply is sent.
pub const DEFAULT_WHO_DELAY: Duration = Duration::from_millis(100);

/// Colour-tagged comma placed between dimension names.
const LIST_SEPARATOR: &str = "[c/00B530:,]";

/// Where a command goes.
#[derive(Debug, Clone)]
pub enum Route {
    Switch(Arc<Backend>),
    Who,
    Dimensions,
    Void,
    Unknown,
}

/// Routes parsed commands for every session of one proxy.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    directory: Arc<RoutingDirectory>,
    marker: char,
    who_delay: Duration,
}

impl CommandDispatcher {
    pub fn new(directory: Arc<RoutingDirectory>) -> Self {
        Self {
            directory,
            marker: DEFAULT_MARKER,
            who_delay: DEFAULT_WHO_DELAY,
        }
    }

    /// Marker used when listing dimensions as commands.
    pub fn with_marker(mut self, marker: char) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_who_delay(mut self, delay: Duration) -> Self {
        self.who_delay = delay;
        self
    }

    pub fn directory(&self) -> &Arc<RoutingDirectory> {
        &self.directory
    }

    pub fn marker(&self) -> char {
        self.marker
    }

    pub fn resolve(&self, command: &Command) -> Route {
        if let Some(backend) = self.directory.get(&command.name) {
            return Route::Switch(Arc::clone(backend));
        }
        match command.name.as_str() {
            "who" => Route::Who,
            "dimensions" => Route::Dimensions,
            "void" => Route::Void,
            _ => Route::Unknown,
        }
    }

    /// Run `command` for `session`.
    ///
    /// Returns whether the command was consumed. `false` means the caller
    /// should treat the line as ordinary chat and pass it on; `who` returns
    /// `false` on purpose so the backend answers it too.
    pub fn handle(&self, command: &Command, session: &mut Session) -> bool {
        tracing::debug!(session = %session.id(), command = %command.name, "dispatching command");
        match self.resolve(command) {
            Route::Switch(target) => {
                self.switch(session, target);
                true
            }
            Route::Who => self.who(session),
            Route::Dimensions => {
                self.dimensions(session);
                true
            }
            Route::Void => {
                migrate::disconnect(session);
                true
            }
            Route::Unknown => false,
        }
    }

    fn switch(&self, session: &mut Session, target: Arc<Backend>) {
        if session.backend().name() == target.name() {
            session.notify(Notice::colored(
                "You are already in that Dimension.",
                Rgb::RED,
            ));
            return;
        }
        if let Err(e) = migrate::migrate(session, target) {
            tracing::warn!(session = %session.id(), error = %e, "dimension switch refused");
        }
    }

    /// Schedule the player-count reply.
    ///
    /// The total is computed now from cached counts. The reply is dropped if
    /// the session unbinds or goes away before the delay elapses.
    fn who(&self, session: &Session) -> bool {
        let total = self.directory.total_clients();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(session = %session.id(), "no runtime to schedule who reply");
            return false;
        };

        let sink = Arc::clone(session.sink());
        let mut lifecycle = session.subscribe();
        let delay = self.who_delay;
        let id = session.id();
        // Asked from the void: only a dropped session cancels the reply.
        let was_bound = session.is_bound();

        runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = lifecycle.wait_for(|state| was_bound && *state == Lifecycle::Unbound) => {
                    tracing::debug!(session = %id, "who reply cancelled");
                    return;
                }
            }
            // Session dropped or unbound while the timer fired.
            if lifecycle.has_changed().is_err()
                || (was_bound && *lifecycle.borrow() != Lifecycle::Bound)
            {
                return;
            }
            let notice = Notice::plain(format!(
                "There are {total} players across all Dimensions in your Timeline."
            ));
            if let Err(e) = sink.send_notice(&notice) {
                tracing::debug!(session = %id, error = %e, "who reply dropped");
            }
        });
        false
    }

    fn dimensions(&self, session: &Session) {
        session.notify(Notice::plain("Available Dimensions: "));
        session.notify(Notice::plain(self.dimensions_line()));
    }

    /// Every dimension as a command, in directory order.
    pub fn dimensions_line(&self) -> String {
        let mut line = String::new();
        for (i, name) in self.directory.names().enumerate() {
            line.push_str(if i > 0 { LIST_SEPARATOR } else { "" });
            line.push(' ');
            line.push(self.marker);
            line.push_str(name);
        }
        line
    }
}
