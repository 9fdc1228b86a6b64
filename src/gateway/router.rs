//! Command routing for inbound frames
//!
//! One frame produces at most one response. Permission is checked before
//! anything else runs; builtins and the host interpreter only ever see
//! commands the session's profile is allowed to issue.

use super::Gateway;
use super::admin::BuiltinCommand;
use super::envelope::RemoteMessage;
use super::error::Result;
use super::log_tap::LogEvent;
use super::profile::Profile;
use super::session::Session;

/// Reply sent to a session that issues a command it may not run
pub const PERMISSION_DENIED: &str = "You do not have permission to run the command";

/// What the router did with a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Malformed or empty frame, or the session's endpoint is gone
    Dropped,
    /// The profile may not run the command; a denial was sent
    Denied,
    /// The host hook claimed the command
    Vetoed,
    /// A builtin ran; its reply was sent to the session
    Builtin(String),
    /// The interpreter produced no output
    Silent,
    /// A `say` line was published to the host log
    Said(String),
    /// A response was sent to the session
    Responded(RemoteMessage),
}

/// Routes inbound requests to builtins or the host interpreter
#[derive(Clone)]
pub struct CommandRouter {
    gateway: Gateway,
}

impl CommandRouter {
    /// Create a router for `gateway`
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Route one inbound text frame from `session`
    ///
    /// Runs the interpreter synchronously; call from a blocking context.
    pub fn route(&self, session: &Session, frame: &str) -> Routed {
        let Some(request) = RemoteMessage::decode(frame) else {
            tracing::trace!(session = %session.id(), "dropping undecodable frame");
            return Routed::Dropped;
        };
        let Some((command, args)) = split_command(&request.message) else {
            return Routed::Dropped;
        };
        let Some(profile) = self.gateway.session_profile(session) else {
            tracing::debug!(session = %session.id(), "dropping frame for deregistered endpoint");
            return Routed::Dropped;
        };

        tracing::debug!(
            profile = %profile.name,
            remote = %session.remote_addr(),
            %command,
            "rcon command received"
        );

        if !self.gateway.evaluator().allows(&profile, &command) {
            self.deny(session);
            return Routed::Denied;
        }

        if let Some(hook) = &self.gateway.host().hook {
            if hook.before_command(session.remote_addr(), &command, &args) {
                return Routed::Vetoed;
            }
        }

        if let Some(parsed) = BuiltinCommand::parse(&command, &args) {
            if !profile.full_access {
                self.deny(session);
                return Routed::Denied;
            }
            let reply = self.run_builtin(&profile, &command, parsed);
            self.gateway.send(session, &RemoteMessage::generic(reply.clone()));
            return Routed::Builtin(reply);
        }

        let Some(output) = self.gateway.host().interpreter.execute(&command, &args) else {
            return Routed::Silent;
        };

        match command.as_str() {
            "say" => {
                let line = format!("{}: {}", profile.display_name, args.join(" "));
                self.publish(&line);
                Routed::Said(line)
            }
            "echo" => self.respond(session, RemoteMessage::generic(args.join(" "))),
            _ => self.respond(session, RemoteMessage::generic(output)),
        }
    }

    /// Run a console line with root privileges, outside any session
    ///
    /// Returns the text a session would have received, if any.
    pub fn execute_console(&self, line: &str) -> Option<String> {
        let (command, args) = split_command(line)?;
        let root = self.gateway.root_profile();

        if let Some(parsed) = BuiltinCommand::parse(&command, &args) {
            return Some(self.run_builtin(&root, &command, parsed));
        }

        let output = self.gateway.host().interpreter.execute(&command, &args)?;
        match command.as_str() {
            "say" => {
                let line = format!("{}: {}", root.display_name, args.join(" "));
                self.publish(&line);
                Some(line)
            }
            "echo" => Some(args.join(" ")),
            _ => Some(output),
        }
    }

    /// Malformed arguments come back as the usage text and change nothing
    fn run_builtin(&self, profile: &Profile, command: &str, parsed: Result<BuiltinCommand>) -> String {
        let builtin = match parsed {
            Ok(builtin) => builtin,
            Err(err) => {
                tracing::debug!(profile = %profile.name, %command, %err, "malformed rcon management command");
                return err.to_string();
            }
        };
        match self.gateway.run_builtin(builtin) {
            Ok(reply) => {
                tracing::info!(profile = %profile.name, %command, "rcon management command succeeded");
                reply
            }
            Err(err) => {
                tracing::warn!(profile = %profile.name, %command, %err, "rcon management command failed");
                err.to_string()
            }
        }
    }

    fn deny(&self, session: &Session) {
        self.gateway
            .send(session, &RemoteMessage::generic(PERMISSION_DENIED));
    }

    fn respond(&self, session: &Session, message: RemoteMessage) -> Routed {
        self.gateway.send(session, &message);
        Routed::Responded(message)
    }

    /// Publish an audit line through the host log, so it reaches every
    /// session exactly once through the log tap
    fn publish(&self, line: &str) {
        match &self.gateway.host().log {
            Some(log) => log.emit(LogEvent::info(line)),
            None => {
                self.gateway.broadcast(&RemoteMessage::generic(line));
            }
        }
    }
}

/// Split a command line into its first token and the remaining arguments
pub fn split_command(line: &str) -> Option<(String, Vec<String>)> {
    let mut words = line.split_whitespace();
    let command = words.next()?.to_string();
    Some((command, words.map(str::to_string).collect()))
}
