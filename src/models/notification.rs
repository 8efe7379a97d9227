use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::PushError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Urgency {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::VeryLow => "very-low",
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::High => "high",
        }
    }
}

impl Display for Urgency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "very-low" | "very_low" | "verylow" => Ok(Urgency::VeryLow),
            "low" => Ok(Urgency::Low),
            "normal" => Ok(Urgency::Normal),
            "high" => Ok(Urgency::High),
            other => Err(format!(
                "unknown urgency '{}' (expected very-low, low, normal or high)",
                other
            )),
        }
    }
}

/// Auxiliary display fields read from the push data file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub badge: Option<String>,

    #[serde(default)]
    pub url: Option<String>,
}

/// One outbound notification, shared read-only by every delivery of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub ttl: u32,
    pub urgency: Urgency,
    pub require_interaction: bool,
    pub data: NotificationData,
}

/// The JSON object the service worker receives after decryption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    pub require_interaction: bool,
}

impl NotificationRequest {
    pub const DEFAULT_TTL: u32 = 3600;

    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ttl: Self::DEFAULT_TTL,
            urgency: Urgency::default(),
            require_interaction: false,
            data: NotificationData::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_require_interaction(mut self, require_interaction: bool) -> Self {
        self.require_interaction = require_interaction;
        self
    }

    pub fn with_data(mut self, data: NotificationData) -> Self {
        self.data = data;
        self
    }

    pub fn payload(&self) -> PushPayload {
        PushPayload {
            title: self.title.clone(),
            body: self.body.clone(),
            icon: self.data.icon.clone(),
            badge: self.data.badge.clone(),
            url: self.data.url.clone(),
            require_interaction: self.require_interaction,
        }
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>, PushError> {
        serde_json::to_vec(&self.payload()).map_err(|e| PushError::Serialization(e.to_string()))
    }
}
