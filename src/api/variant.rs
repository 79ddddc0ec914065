//! Handler variants served by this process.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Contract mode a variant answers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Raw text body, no envelope.
    PlainText,
    /// JSON `InvokeResponse` envelope.
    Envelope,
}

/// Which HTTP-triggered function this process implements.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HandlerVariant {
    /// Plain-text greeting.
    #[default]
    Text,
    /// Plain-text greeting; ensures a Cosmos DB database exists at startup.
    TextWithDatabase,
    /// Envelope with a message, an object literal and an HTTP response output.
    Envelope,
    /// Envelope with `output1` and an integer return value.
    EnvelopeInteger,
    /// Envelope forwarding the request `Data` into a `document` output.
    Document,
}

impl HandlerVariant {
    /// Contract mode of this variant.
    pub fn mode(&self) -> Mode {
        match self {
            HandlerVariant::Text | HandlerVariant::TextWithDatabase => Mode::PlainText,
            HandlerVariant::Envelope
            | HandlerVariant::EnvelopeInteger
            | HandlerVariant::Document => Mode::Envelope,
        }
    }

    /// Route the host calls when no override is configured.
    ///
    /// Forwarded HTTP requests keep their `/api` prefix; envelope invocations
    /// are posted to the bare function name.
    pub fn default_route(&self) -> &'static str {
        match self.mode() {
            Mode::PlainText => "/api/HttpExample",
            Mode::Envelope => "/HttpExample",
        }
    }

    /// Whether startup must ensure the configured database exists.
    pub fn requires_database(&self) -> bool {
        matches!(self, HandlerVariant::TextWithDatabase)
    }

    /// Whether an empty request body is accepted as an empty envelope.
    pub fn accepts_empty_body(&self) -> bool {
        !matches!(self, HandlerVariant::Document)
    }
}
