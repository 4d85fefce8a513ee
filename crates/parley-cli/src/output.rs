//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use parley_core::{Message, PresenceStatus};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// A change observed while watching a conversation
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message(Message),
    Connected(bool),
    Typing(Vec<String>),
    Presence {
        user_id: String,
        status: PresenceStatus,
    },
    Error(String),
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print one chat message
    pub fn print_message(&self, message: &Message) {
        match self.format {
            OutputFormat::Human => println!("{}", format_message(message)),
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(message).unwrap_or_default());
            }
            OutputFormat::Quiet => println!("{}", message.id),
        }
    }

    /// Print a watch event
    pub fn print_event(&self, event: &Event) {
        match self.format {
            OutputFormat::Json => println!("{}", event_json(event)),
            OutputFormat::Quiet => {
                if let Event::Message(message) = event {
                    println!("{}", message.id);
                }
            }
            OutputFormat::Human => match event {
                Event::Message(message) => println!("{}", format_message(message)),
                Event::Connected(true) => println!("-- connected"),
                Event::Connected(false) => println!("-- disconnected"),
                Event::Typing(users) if users.is_empty() => println!("-- nobody is typing"),
                Event::Typing(users) => println!("-- {} typing...", users.join(", ")),
                Event::Presence { user_id, status } => println!("-- {} is {}", user_id, status),
                Event::Error(error) => println!("-- error: {}", error),
            },
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn format_message(message: &Message) -> String {
    format!(
        "[{}] {}: {}",
        message.created_at.format("%H:%M:%S"),
        message.author,
        message.content
    )
}

fn event_json(event: &Event) -> serde_json::Value {
    match event {
        Event::Message(message) => serde_json::json!({"event": "message", "message": message}),
        Event::Connected(connected) => {
            serde_json::json!({"event": "connection", "connected": connected})
        }
        Event::Typing(users) => serde_json::json!({"event": "typing", "users": users}),
        Event::Presence { user_id, status } => {
            serde_json::json!({"event": "presence", "userId": user_id, "status": status})
        }
        Event::Error(error) => serde_json::json!({"event": "error", "message": error}),
    }
}
