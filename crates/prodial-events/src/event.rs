//! Provider event parsing and representation
//!
//! This module handles parsing telephony provider callback messages and
//! provides convenient access to event headers.

use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Provider event structure
///
/// Represents a parsed provider callback with headers as key-value pairs.
/// Events use URL-encoded format for header values.
#[derive(Debug, Clone, Default)]
pub struct ProviderEvent {
    /// Event headers (key-value pairs)
    headers: HashMap<String, String>,

    /// Raw event body (if present)
    body: Option<String>,
}

impl ProviderEvent {
    /// Create a new empty event
    pub fn new() -> Self {
        Self {
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Parse a provider event from raw text
    ///
    /// Events are formatted as:
    /// ```text
    /// Header-Name: value
    /// Another-Header: another value
    ///
    /// Optional body content
    /// ```
    pub fn parse(raw: &str) -> Self {
        let mut headers = HashMap::new();
        let mut body = None;
        let mut in_body = false;
        let mut body_lines = Vec::new();

        for line in raw.lines() {
            if in_body {
                body_lines.push(line);
                continue;
            }

            // Empty line separates headers from body
            if line.trim().is_empty() {
                in_body = true;
                continue;
            }

            // Parse header line: "Key: Value"
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim().to_string();
                let value = value.trim().to_string();

                // URL decode the value
                let decoded_value = urlencoding::decode(&value)
                    .unwrap_or_else(|_| value.clone().into())
                    .to_string();

                headers.insert(key, decoded_value);
            }
        }

        if !body_lines.is_empty() {
            body = Some(body_lines.join("\n"));
        }

        Self { headers, body }
    }

    /// Get a header value by name
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    /// Get all headers
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Get event body
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Set a header
    pub fn set_header(&mut self, key: String, value: String) {
        self.headers.insert(key, value);
    }

    // Common event headers with convenient accessors

    /// Get event name (Event-Name header)
    pub fn event_name(&self) -> Option<&str> {
        self.get_header("Event-Name")
    }

    /// Get the engine-side call id (Call-ID header)
    pub fn call_id(&self) -> Option<Uuid> {
        self.get_header("Call-ID")
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Get the provider-side call identifier
    pub fn provider_call_id(&self) -> Option<&str> {
        self.get_header("Provider-Call-ID")
            .or_else(|| self.get_header("Unique-ID"))
    }

    /// Get hangup cause
    pub fn hangup_cause(&self) -> Option<&str> {
        self.get_header("Hangup-Cause")
    }

    /// Get answering-machine detection result
    pub fn amd_result(&self) -> Option<&str> {
        self.get_header("AMD-Result")
    }

    /// Get destination number
    pub fn destination_number(&self) -> Option<&str> {
        self.get_header("Destination-Number")
    }

    /// Get billable seconds
    pub fn billsec(&self) -> Option<i64> {
        self.get_header("Billsec").and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for ProviderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderEvent {{")?;

        if let Some(event_name) = self.event_name() {
            write!(f, " Event-Name: {}", event_name)?;
        }

        if let Some(call_id) = self.call_id() {
            write!(f, ", Call-ID: {}", call_id)?;
        }

        if let Some(cause) = self.hangup_cause() {
            write!(f, ", Cause: {}", cause)?;
        }

        write!(f, ", Headers: {} }}", self.headers.len())
    }
}
