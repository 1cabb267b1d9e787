//! Metrics definitions for the auth service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `auth_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `outcome`: `valid` plus one value per verification failure reason (8 total)
//! - `status`: `success`, `error`
//!
//! Recording is a no-op until [`init_metrics_recorder`] installs a recorder.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and serve `/metrics` on `bind_address`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns error if the recorder cannot be installed (e.g., already
/// installed) or the listener cannot be set up.
pub fn init_metrics_recorder(bind_address: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(bind_address)
        // Verification is local crypto unless a refresh is needed
        .set_buckets_for_metric(
            Matcher::Full("auth_verify_duration_seconds".to_string()),
            &[
                0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
                5.000,
            ],
        )
        .map_err(|e| format!("Failed to set verify buckets: {e}"))?
        // Provider fetches are bounded by the fetch timeout
        .set_buckets_for_metric(
            Matcher::Full("auth_key_refresh_duration_seconds".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set key refresh buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Record one verification.
///
/// Metric: `auth_verify_total`, `auth_verify_duration_seconds`
/// Labels: `outcome`
pub fn record_verification(outcome: &'static str, duration: Duration) {
    counter!("auth_verify_total", "outcome" => outcome).increment(1);
    histogram!("auth_verify_duration_seconds").record(duration.as_secs_f64());
}

/// Record one provider key fetch.
///
/// Metric: `auth_key_refresh_total`, `auth_key_refresh_duration_seconds`
/// Labels: `status`
pub fn record_key_refresh(success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    counter!("auth_key_refresh_total", "status" => status).increment(1);
    histogram!("auth_key_refresh_duration_seconds").record(duration.as_secs_f64());
}

/// Set the number of keys in the current snapshot.
///
/// Metric: `auth_keys_cached`
pub fn set_keys_cached(count: usize) {
    // Key sets hold a handful of keys, no precision loss
    #[allow(clippy::cast_precision_loss)]
    let count = count as f64;
    gauge!("auth_keys_cached").set(count);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::errors::VerifyError;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use std::collections::HashSet;

    /// Counters recorded while running `f`, as `(name, labels, value)`.
    fn recorded_counters(f: impl FnOnce()) -> Vec<(String, Vec<(String, String)>, u64)> {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, f);

        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(count) => {
                    let labels = key
                        .key()
                        .labels()
                        .map(|label| (label.key().to_string(), label.value().to_string()))
                        .collect();
                    Some((key.key().name().to_string(), labels, count))
                }
                _ => None,
            })
            .collect()
    }

    fn all_verify_errors() -> Vec<VerifyError> {
        vec![
            VerifyError::TokenTooLarge,
            VerifyError::MalformedToken,
            VerifyError::UnsupportedAlgorithm("none".to_string()),
            VerifyError::MissingKeyId,
            VerifyError::KeyUnavailable,
            VerifyError::InternalKeyParseFault,
            VerifyError::SignatureOrClaims,
        ]
    }

    #[test]
    fn test_verify_outcome_labels_are_bounded() {
        let mut outcomes: Vec<&'static str> =
            all_verify_errors().iter().map(VerifyError::reason).collect();
        outcomes.push("valid");

        let counters = recorded_counters(|| {
            for outcome in &outcomes {
                record_verification(*outcome, Duration::from_millis(2));
            }
            // Repeats must not create new series
            record_verification("valid", Duration::from_millis(1));
        });

        let verify_counters: Vec<_> = counters
            .iter()
            .filter(|(name, _, _)| name == "auth_verify_total")
            .collect();
        assert_eq!(verify_counters.len(), 8);

        let recorded: HashSet<&str> = verify_counters
            .iter()
            .map(|(_, labels, _)| {
                assert_eq!(labels.len(), 1);
                assert_eq!(labels[0].0, "outcome");
                labels[0].1.as_str()
            })
            .collect();
        let expected: HashSet<&str> = outcomes.iter().copied().collect();
        assert_eq!(recorded, expected);

        let valid = verify_counters
            .iter()
            .find(|(_, labels, _)| labels[0].1 == "valid")
            .unwrap();
        assert_eq!(valid.2, 2);
    }

    #[test]
    fn test_key_refresh_status_labels() {
        let counters = recorded_counters(|| {
            record_key_refresh(true, Duration::from_millis(120));
            record_key_refresh(true, Duration::from_millis(80));
            record_key_refresh(false, Duration::from_secs(5));
            set_keys_cached(2);
        });

        let status_count = |status: &str| {
            counters
                .iter()
                .find(|(name, labels, _)| {
                    name == "auth_key_refresh_total"
                        && labels == &[("status".to_string(), status.to_string())]
                })
                .map(|(_, _, count)| *count)
        };

        assert_eq!(status_count("success"), Some(2));
        assert_eq!(status_count("error"), Some(1));
        assert_eq!(
            counters
                .iter()
                .filter(|(name, _, _)| name == "auth_key_refresh_total")
                .count(),
            2
        );
    }

    #[test]
    fn test_recording_without_recorder_is_a_no_op() {
        record_verification("valid", Duration::from_millis(2));
        record_key_refresh(false, Duration::from_secs(5));
        set_keys_cached(2);
    }
}
