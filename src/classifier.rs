//! Domain classifier: decides whether a query is inside the supported
//! IT-support topic area, and extracts a device brand hint.
//!
//! The gate is deliberately asymmetric: empty input fails closed, but a
//! classification-provider error fails OPEN (defaults to "supported") so a
//! transient model failure never wrongly rejects a user. The error is
//! logged, not raised — callers never see a hard failure from this step.

use std::sync::Arc;

use crate::llm::LanguageModel;

/// Outcome of classifying one query.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub supported: bool,
    pub device_hint: Option<String>,
}

/// Brand vocabulary for device-hint extraction. First match wins; Apple
/// sub-brands are listed most-specific-first so "macbook" beats "mac"
/// beats "apple".
const DEVICE_BRANDS: &[(&str, &str)] = &[
    ("macbook", "MacBook"),
    ("imac", "iMac"),
    ("mac", "Mac"),
    ("apple", "Apple"),
    ("iphone", "iPhone"),
    ("ipad", "iPad"),
    ("surface", "Surface"),
    ("microsoft", "Microsoft"),
    ("thinkpad", "ThinkPad"),
    ("lenovo", "Lenovo"),
    ("dell", "Dell"),
    ("hp", "HP"),
    ("asus", "Asus"),
    ("acer", "Acer"),
    ("samsung", "Samsung"),
    ("toshiba", "Toshiba"),
    ("chromebook", "Chromebook"),
];

/// IT-support vocabulary for the keyword short-circuit. A hit here skips
/// the model call entirely.
const SUPPORT_KEYWORDS: &[&str] = &[
    "wifi",
    "wi-fi",
    "internet",
    "network",
    "router",
    "vpn",
    "printer",
    "password",
    "login",
    "error",
    "crash",
    "freeze",
    "blue screen",
    "bsod",
    "install",
    "uninstall",
    "update",
    "upgrade",
    "driver",
    "virus",
    "malware",
    "ransomware",
    "phishing",
    "slow",
    "boot",
    "restart",
    "reboot",
    "screen",
    "display",
    "monitor",
    "keyboard",
    "mouse",
    "laptop",
    "desktop",
    "computer",
    "windows",
    "linux",
    "server",
    "email",
    "outlook",
    "browser",
    "disk",
    "drive",
    "storage",
    "backup",
    "battery",
    "bluetooth",
    "usb",
    "software",
    "hardware",
    "firewall",
];

const CLASSIFY_PROMPT: &str = "You are a strict topic classifier for an IT support \
service covering hardware, software, network, and security questions. \
Answer with a single word, YES or NO: is the following question an IT \
support question?\n\nQuestion: ";

pub struct DomainClassifier {
    model: Arc<dyn LanguageModel>,
}

impl DomainClassifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn classify(&self, query: &str) -> Classification {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Classification {
                supported: false,
                device_hint: None,
            };
        }

        let device_hint = detect_device_hint(trimmed);

        if matches_support_vocabulary(trimmed) {
            return Classification {
                supported: true,
                device_hint,
            };
        }

        // Inconclusive — spend one model call.
        let prompt = format!("{}{}", CLASSIFY_PROMPT, trimmed);
        let supported = match self.model.generate(&prompt).await {
            Ok(answer) => answer.trim().to_lowercase().starts_with("yes"),
            Err(e) => {
                // Fail open: never block a user on a classifier failure.
                tracing::warn!(error = %e, "Domain classification call failed, defaulting to supported");
                true
            }
        };

        Classification {
            supported,
            device_hint,
        }
    }
}

/// Substring match against the brand vocabulary; first match wins.
pub fn detect_device_hint(query: &str) -> Option<String> {
    let lower = query.to_lowercase();
    DEVICE_BRANDS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, hint)| hint.to_string())
}

fn matches_support_vocabulary(query: &str) -> bool {
    let lower = query.to_lowercase();
    SUPPORT_KEYWORDS.iter().any(|kw| lower.contains(kw))
}
