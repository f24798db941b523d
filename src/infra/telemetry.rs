use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub(crate) fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "mdport_export_total",
            Unit::Count,
            "Export attempts, labelled by result."
        );
        describe_counter!(
            "mdport_export_skipped_images_total",
            Unit::Count,
            "Image references left unmodified because their source could not be staged."
        );
        describe_histogram!(
            "mdport_export_archive_bytes",
            Unit::Bytes,
            "Size of produced export archives."
        );
        describe_counter!(
            "mdport_upload_total",
            Unit::Count,
            "Image uploads, labelled by result."
        );
        describe_counter!(
            "mdport_maintenance_removed_total",
            Unit::Count,
            "Entries removed by storage reclamation."
        );
    });
}
