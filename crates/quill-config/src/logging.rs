//! Log output settings shared by the host binary and plugin processes.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported log output formats.
///
/// The host writes its own records in this format. Plugin processes always
/// log compact lines to their stderr, which the host re-emits through its own
/// subscriber.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Human-readable single line output.
    #[default]
    Compact,
    /// Structured JSON suitable for log collectors.
    Json,
}

impl LogFormat {
    /// Returns `true` when records should be emitted as JSON objects.
    #[must_use]
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Error produced when a [`LogFormat`] cannot be parsed from text.
pub type LogFormatParseError = strum::ParseError;
