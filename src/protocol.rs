//! Command vocabulary and response validation.
//!
//! Every command is a single code, optionally followed by colon-delimited
//! arguments. Every response is colon-delimited and must echo the sent
//! code in its first field; the device reuses the same grammar for error
//! records, so the echo check is the one guard against taking a stray
//! record for an answer.

use crate::error::{AstroLinkError, Result};
use crate::transport::LineExchange;

/// Field delimiter on the wire.
pub const DELIMITER: char = ':';

/// Identification prefix every supported device answers `#` with.
pub const MODEL_PREFIX: &str = "#:AstroLink4mini";

/// Command codes understood by the device.
pub mod cmd {
    /// Identify; answers `#:<model>`.
    pub const IDENTIFY: &str = "#";
    /// Status snapshot; answers `q:<code>:<fields...>`.
    pub const STATUS: &str = "q";
    /// Read the settings record; answers `u:<fields...>`.
    pub const SETTINGS_READ: &str = "u";
    /// Write the full settings record; echo only.
    pub const SETTINGS_WRITE: &str = "U";
    /// Absolute move: `R:<channel>:<ticks>`.
    pub const MOVE_ABS: &str = "R";
    /// Sync (zero-calibrate): `P:<channel>:<ticks>`.
    pub const SYNC: &str = "P";
    /// Abort motion: `H` or `H:<channel>`.
    pub const ABORT: &str = "H";
    /// Trigger compensation now: `S:<threshold>`.
    pub const COMPENSATE: &str = "S";
    /// Manual-control toggle: `F:<0|1>`.
    pub const MANUAL_SET: &str = "F";
    /// Manual-control status read; answers `f:<0|1>`.
    pub const MANUAL_READ: &str = "f";
    /// Firmware version; answers `A:<version>`.
    pub const VERSION: &str = "A";
}

/// Split a response line into its fields.
pub fn split_fields(line: &str) -> Vec<String> {
    line.split(DELIMITER).map(str::to_string).collect()
}

/// Build a command line from a code and its arguments.
pub fn build_command(code: &str, args: &[&str]) -> String {
    let mut line = String::from(code);
    for arg in args {
        line.push(DELIMITER);
        line.push_str(arg);
    }
    line
}

/// Send `code[:arg]*` and return the validated response payload.
///
/// The leading echoed code is stripped; payload indices are relative to
/// what remains.
pub async fn command(
    link: &dyn LineExchange,
    code: &str,
    args: &[&str],
) -> Result<Vec<String>> {
    let line = build_command(code, args);
    send_line(link, code, &line).await
}

/// Send `code[:arg]*` without waiting for the echo.
///
/// Every command gets echoed, so skipping the wait forfeits the one
/// validity check this protocol has; reserved for callers that are
/// tearing down anyway.
pub async fn post(link: &dyn LineExchange, code: &str, args: &[&str]) -> Result<()> {
    let line = build_command(code, args);
    link.post(&line).await
}

/// Send a pre-built line and validate the echoed code.
///
/// Used by the settings codec, whose rewrite line is assembled from a
/// whole record rather than individual arguments.
pub(crate) async fn send_line(
    link: &dyn LineExchange,
    code: &str,
    line: &str,
) -> Result<Vec<String>> {
    let response = link.exchange(line).await?;
    let mut fields = split_fields(&response);

    if fields.first().map(String::as_str) != Some(code) {
        // Logged apart from transport failures: the link worked, the
        // device answered the wrong thing.
        tracing::warn!(sent = code, response = %response, "response does not echo sent command");
        return Err(AstroLinkError::ProtocolMismatch {
            sent: code.to_string(),
            got: fields.first().cloned().unwrap_or_default(),
        });
    }

    fields.remove(0);
    Ok(fields)
}

/// Identification gate run once per connection attempt.
///
/// The first 16 characters of the `#` response must match
/// [`MODEL_PREFIX`]; anything else rejects the connection. Returns the
/// model string.
pub async fn identify(link: &dyn LineExchange) -> Result<String> {
    let response = link.exchange(cmd::IDENTIFY).await?;
    if !response.starts_with(MODEL_PREFIX) {
        return Err(AstroLinkError::IdentityRejected { response });
    }
    Ok(response[cmd::IDENTIFY.len() + 1..].to_string())
}

/// Query the firmware version string.
pub async fn firmware_version(link: &dyn LineExchange) -> Result<String> {
    let payload = command(link, cmd::VERSION, &[]).await?;
    Ok(payload.join(":"))
}

/// Read a response field as `f64`.
pub(crate) fn float_field(payload: &[String], index: usize) -> Result<f64> {
    let raw = payload
        .get(index)
        .ok_or(AstroLinkError::RecordTruncated {
            len: payload.len(),
            index,
        })?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| AstroLinkError::FieldParse {
            index,
            value: raw.clone(),
        })
}

/// Read a response field as an integer tick count.
///
/// The device emits integers here, but decodes go through `f64` so a
/// firmware that prints `1234.0` still parses.
pub(crate) fn int_field(payload: &[String], index: usize) -> Result<i32> {
    Ok(float_field(payload, index)?.round() as i32)
}

/// Read a response field as a zero/non-zero flag.
pub(crate) fn flag_field(payload: &[String], index: usize) -> Result<bool> {
    Ok(float_field(payload, index)? != 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;

    /// Answers every exchange with one fixed line.
    struct StaticLink(&'static str);

    #[async_trait]
    impl LineExchange for StaticLink {
        async fn exchange(&self, _command: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn build_command_joins_args_with_delimiter() {
        assert_eq!(build_command("R", &["0", "1050"]), "R:0:1050");
        assert_eq!(build_command("q", &[]), "q");
    }

    #[tokio::test]
    async fn matching_echo_is_accepted_and_stripped() {
        let link = StaticLink("q:AL4MII:1234:0");
        let payload = command(&link, "q", &[]).await.unwrap();
        assert_eq!(payload, vec!["AL4MII", "1234", "0"]);
    }

    #[tokio::test]
    async fn mismatched_echo_is_rejected_despite_transport_success() {
        let link = StaticLink("u:1:2:3");
        let err = command(&link, "q", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            AstroLinkError::ProtocolMismatch { ref sent, ref got } if sent == "q" && got == "u"
        ));
    }

    #[tokio::test]
    async fn echo_only_response_yields_empty_payload_field() {
        let link = StaticLink("R:");
        let payload = command(&link, "R", &["0", "100"]).await.unwrap();
        assert_eq!(payload, vec![""]);
    }

    #[tokio::test]
    async fn post_skips_echo_validation() {
        // The "response" would fail the echo check; post never looks.
        let link = StaticLink("u:1:2:3");
        post(&link, "H", &["0"]).await.unwrap();
    }

    #[tokio::test]
    async fn identify_accepts_the_model_prefix() {
        let link = StaticLink("#:AstroLink4mini II");
        let model = identify(&link).await.unwrap();
        assert_eq!(model, "AstroLink4mini II");
    }

    #[tokio::test]
    async fn identify_rejects_other_devices() {
        let link = StaticLink("#:SomeOtherBox");
        let err = identify(&link).await.unwrap_err();
        assert!(matches!(err, AstroLinkError::IdentityRejected { .. }));
    }

    #[test]
    fn field_readers_report_position_and_value() {
        let payload = split_fields("12.5:x:3");
        assert_eq!(float_field(&payload, 0).unwrap(), 12.5);
        assert_eq!(int_field(&payload, 2).unwrap(), 3);
        assert!(matches!(
            float_field(&payload, 1),
            Err(AstroLinkError::FieldParse { index: 1, .. })
        ));
        assert!(matches!(
            float_field(&payload, 9),
            Err(AstroLinkError::RecordTruncated { len: 3, index: 9 })
        ));
    }
}
