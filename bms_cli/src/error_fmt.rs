//! Human-readable error descriptions, exit codes and structured JSON errors.

use bms_core::error::{BmsError, BuildError};

/// Configuration rejected (parse, validation, calibration CSV).
pub const EXIT_CONFIG: i32 = 3;
/// Relay, balance or keep-alive store I/O failed.
pub const EXIT_OUTPUT: i32 = 4;
/// Anything else.
pub const EXIT_OTHER: i32 = 1;

fn typed(err: &eyre::Report) -> (Option<&BuildError>, Option<&BmsError>) {
    let build = err.chain().find_map(|e| e.downcast_ref::<BuildError>());
    let bms = err.chain().find_map(|e| e.downcast_ref::<BmsError>());
    (build, bms)
}

/// Stable short name for the error class, used in JSON output.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    match typed(err) {
        (Some(_), _) => "Build",
        (None, Some(e)) => match e {
            BmsError::SensorUnavailable(_) => "SensorUnavailable",
            BmsError::ChannelStale(_) => "ChannelStale",
            BmsError::LimitExceeded { .. } => "LimitExceeded",
            BmsError::KeepAliveExpired => "KeepAliveExpired",
            BmsError::ConfigInvalid(_) => "ConfigInvalid",
            BmsError::Relay(_) => "Relay",
            BmsError::Io(_) => "Io",
            BmsError::State(_) => "State",
        },
        (None, None) if is_config_text(err) => "ConfigInvalid",
        (None, None) => "Error",
    }
}

fn is_config_text(err: &eyre::Report) -> bool {
    let lower = err.to_string().to_ascii_lowercase();
    lower.starts_with("parse config")
        || lower.starts_with("read config")
        || lower.contains("calibration csv")
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    let (build, bms) = typed(err);
    if let Some(be) = build {
        return match be {
            BuildError::MissingRelay => {
                "What happened: No relay output was provided to the controller.\nLikely causes: The contactor driver failed to initialize.\nHow to fix: Check [relay] pin and GPIO permissions.".to_string()
            }
            BuildError::MissingBalancer => {
                "What happened: No balance output was provided to the controller.\nLikely causes: The bleed-resistor outputs failed to initialize.\nHow to fix: Check [balance] pins and GPIO permissions.".to_string()
            }
            BuildError::MissingConfig => {
                "What happened: The controller was built without a configuration.\nHow to fix: Pass --config with a valid TOML file.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(e) = bms {
        return match e {
            BmsError::ConfigInvalid(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
            BmsError::Relay(msg) => format!(
                "What happened: The relay or balance output failed ({msg}).\nLikely causes: Wiring, driver power or GPIO permissions.\nHow to fix: Verify the contactor driver; the relay may be in an unknown position."
            ),
            BmsError::Io(msg) => format!(
                "What happened: File access failed ({msg}).\nLikely causes: The keep-alive store or log directory is missing or not writable.\nHow to fix: Check [keepalive] path and [logging] paths."
            ),
            BmsError::SensorUnavailable(msg) => format!(
                "What happened: The sensor link is unavailable ({msg}).\nLikely causes: Cable, bus address or power of the cell monitor.\nHow to fix: Check the link and rerun with --log-level=debug."
            ),
            other => format!(
                "What happened: {other}.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    let msg = err.to_string();
    if err
        .chain()
        .any(|e| e.to_string().contains("calibration CSV must have headers"))
    {
        return "Invalid headers in cell calibration CSV. Expected 'cell,scale,offset'.".to_string();
    }
    if is_config_text(err) {
        let cause = err.root_cause();
        return format!(
            "What happened: {msg}.\nLikely causes: {cause}\nHow to fix: Fix the file and rerun."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error class.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match typed(err) {
        (Some(_), _) => EXIT_CONFIG,
        (None, Some(BmsError::ConfigInvalid(_))) => EXIT_CONFIG,
        (None, Some(BmsError::Relay(_) | BmsError::Io(_))) => EXIT_OUTPUT,
        (None, Some(_)) => EXIT_OTHER,
        (None, None) if is_config_text(err) => EXIT_CONFIG,
        (None, None) => EXIT_OTHER,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
