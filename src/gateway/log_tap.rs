//! Bridge from the host log stream to connected sessions
//!
//! Each non-empty log event is classified (chat or generic), wrapped in an
//! unsolicited envelope and broadcast to every session. Handlers only enqueue;
//! a pump task owned by the running gateway does the broadcasting, so a log
//! line written while the gateway lock is held cannot deadlock.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, Layer};
use uuid::Uuid;

use super::Shared;
use super::envelope::{MessageType, RemoteMessage};
use super::host::{LogHandler, LogSource, SubscriptionId};

/// Literal prefixes that mark a chat line
pub const CHAT_PREFIXES: [&str; 2] = ["[chat]", "[team chat]"];

/// Severity of a host log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// Diagnostic detail
    Debug,
    /// Regular log line
    Info,
    /// Warning
    Warning,
    /// Error line
    Error,
    /// Uncaught exception
    Exception,
}

/// One event from the host log stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Log text
    pub text: String,
    /// Auxiliary trace, usually present for errors
    pub trace: Option<String>,
    /// Severity
    pub level: LogLevel,
    /// When the event was produced
    pub at: DateTime<Utc>,
}

impl LogEvent {
    /// Create an event without a trace
    pub fn new(text: impl Into<String>, level: LogLevel) -> Self {
        Self {
            text: text.into(),
            trace: None,
            level,
            at: Utc::now(),
        }
    }

    /// Regular informational line
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(text, LogLevel::Info)
    }

    /// Attach a trace
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// Classify a log line
pub fn classify(text: &str) -> MessageType {
    let text = text.trim_start();
    let is_chat = CHAT_PREFIXES.iter().any(|prefix| {
        text.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    });
    if is_chat {
        MessageType::Chat
    } else {
        MessageType::Generic
    }
}

/// Wrap a log event in a broadcast envelope; empty lines yield `None`
pub fn envelope_for(event: &LogEvent) -> Option<RemoteMessage> {
    if event.text.is_empty() {
        return None;
    }
    Some(
        RemoteMessage::classified(event.text.clone(), classify(&event.text))
            .with_stacktrace(event.trace.clone()),
    )
}

/// In-process log stream
///
/// Hosts without a log system of their own can use this as the gateway's
/// [`LogSource`], optionally fed from `tracing` by [`TracingForwarder`].
#[derive(Default)]
pub struct LogBus {
    handlers: RwLock<Vec<(SubscriptionId, LogHandler)>>,
}

impl LogBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl LogSource for LogBus {
    fn subscribe(&self, handler: LogHandler) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.handlers.write().push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    fn emit(&self, event: LogEvent) {
        // Handlers run outside the lock so they may subscribe or emit themselves.
        let handlers: Vec<LogHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }
}

/// A live subscription from the host log to the gateway broadcast path
pub(crate) struct LogTap {
    source: Arc<dyn LogSource>,
    subscription: SubscriptionId,
    pump: JoinHandle<()>,
}

impl LogTap {
    /// Subscribe to `source` and start pumping events into broadcasts
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn attach(source: Arc<dyn LogSource>, gateway: Weak<Shared>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogEvent>();
        let handler: LogHandler = Arc::new(move |event: &LogEvent| {
            let _ = tx.send(event.clone());
        });
        let subscription = source.subscribe(handler);

        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(shared) = gateway.upgrade() else {
                    break;
                };
                if let Some(message) = envelope_for(&event) {
                    shared.broadcast(&message);
                }
            }
        });

        Self {
            source,
            subscription,
            pump,
        }
    }

    /// Unsubscribe and stop the pump
    pub(crate) fn detach(self) {
        self.source.unsubscribe(self.subscription);
        self.pump.abort();
    }
}

/// `tracing` layer that republishes events into a [`LogSource`]
///
/// Only events at INFO and above are forwarded. Warnings and errors keep
/// their severity; the formatted fields become the event trace.
pub struct TracingForwarder {
    sink: Arc<dyn LogSource>,
}

impl TracingForwarder {
    /// Forward events into `sink`
    pub fn new(sink: Arc<dyn LogSource>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for TracingForwarder
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::INFO {
            return;
        }

        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);
        if visitor.message.is_empty() {
            return;
        }

        let level = if level == tracing::Level::ERROR {
            LogLevel::Error
        } else if level == tracing::Level::WARN {
            LogLevel::Warning
        } else {
            LogLevel::Info
        };
        let mut log_event = LogEvent::new(visitor.message, level);
        if level == LogLevel::Error && !visitor.fields.is_empty() {
            log_event = log_event.with_trace(visitor.fields.join(" "));
        } else if !visitor.fields.is_empty() {
            log_event.text = format!("{} {}", log_event.text, visitor.fields.join(" "));
        }
        self.sink.emit(log_event);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Vec<String>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}
