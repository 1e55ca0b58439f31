//! Log output and optional OTLP trace export for the itemkeep server.
//!
//! Logs go to stderr either human readable (`pretty`) or one JSON object per
//! line (`json`). When `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans (HTTP
//! requests, `db.query`, auth decisions) are also exported over OTLP/gRPC.

use anyhow::{Result, anyhow, bail};
use base64ct::{Base64, Encoding};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env::var, str::FromStr, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, Subscriber, debug};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, registry::LookupSpan,
};
use ulid::Ulid;
use url::Url;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

// Crates that are noisy at the levels the service itself logs at.
const QUIET_TARGETS: [&str; 4] = [
    "hyper=error",
    "tokio=error",
    "sqlx=warn",
    "opentelemetry_sdk=warn",
];

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => bail!("unknown log format '{other}', expected 'pretty' or 'json'"),
        }
    }
}

/// Exporter settings taken from the standard `OTEL_*` variables.
#[derive(Debug, PartialEq, Eq)]
struct OtlpSettings {
    endpoint: String,
    headers: Vec<(String, String)>,
    instance_id: String,
}

impl OtlpSettings {
    /// `None` when no collector endpoint is configured.
    fn from_env() -> Option<Self> {
        let endpoint = var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

        if let Ok(protocol) = var("OTEL_EXPORTER_OTLP_PROTOCOL") {
            if protocol != "grpc" {
                debug!("OTEL_EXPORTER_OTLP_PROTOCOL='{protocol}' ignored, exporting over grpc");
            }
        }

        Some(Self {
            endpoint: with_scheme(&endpoint),
            headers: var("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|raw| header_pairs(&raw))
                .unwrap_or_default(),
            instance_id: var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
        })
    }
}

/// Split `k1=v1,k2=v2`; entries without `=` or with an empty key are dropped.
fn header_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

// Keys ending in "-bin" carry base64 encoded binary metadata.
fn grpc_metadata(headers: &[(String, String)]) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::with_capacity(headers.len());

    for (key, value) in headers {
        if key.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|err| anyhow!("header {key}: value is not base64: {err}"))?;
            let key = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|err| anyhow!("header {key}: invalid binary key: {err}"))?;
            metadata.insert_bin(key, MetadataValue::from_bytes(&bytes));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|err| anyhow!("header {key}: invalid key: {err}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|err| anyhow!("header {key}: invalid value: {err}"))?;
            metadata.insert(name, value);
        }
    }

    Ok(metadata)
}

/// Bare `host:port` endpoints are assumed to be TLS collectors.
fn with_scheme(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

/// Host name to verify the collector certificate against, for https only.
fn tls_domain(endpoint: &str) -> Option<String> {
    let url = Url::parse(endpoint).ok()?;
    if url.scheme() != "https" {
        return None;
    }
    url.host_str().map(str::to_string)
}

/// Attributes attached to every exported span.
fn resource(instance_id: &str) -> Resource {
    Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.namespace", "itemkeep"),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", instance_id.to_string()),
            KeyValue::new("vcs.revision", crate::GIT_COMMIT_HASH),
        ])
        .build()
}

fn init_tracer(settings: &OtlpSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT);

    if let Some(domain) = tls_domain(&settings.endpoint) {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain)
                .with_native_roots(),
        );
    }

    if !settings.headers.is_empty() {
        builder = builder.with_metadata(grpc_metadata(&settings.headers)?);
    }

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(builder.build()?)
        .with_resource(resource(&settings.instance_id))
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// `RUST_LOG` wins over the verbosity flag; dependency noise is capped.
fn default_filter(level: Level) -> Result<EnvFilter> {
    QUIET_TARGETS.iter().try_fold(
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy(),
        |filter, directive| -> Result<EnvFilter> {
            Ok(filter.add_directive(directive.parse()?))
        },
    )
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    let layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false);

    match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().with_current_span(true).boxed(),
    }
}

/// Install the global subscriber. Spans are exported when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// # Errors
///
/// Returns an error if the exporter or the subscriber cannot be set up.
pub fn init(verbosity_level: Option<Level>, format: LogFormat) -> Result<()> {
    let filter = default_filter(verbosity_level.unwrap_or(Level::ERROR))?;

    let otel_layer = OtlpSettings::from_env()
        .map(|settings| init_tracer(&settings))
        .transpose()?
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let subscriber = Registry::default()
        .with(fmt_layer(format))
        .with(otel_layer)
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush pending spans. Does nothing when export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("Flushing trace exporter");
        if let Err(err) = provider.shutdown() {
            debug!("Trace exporter shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribute(resource: &Resource, key: &str) -> Option<String> {
        resource
            .iter()
            .find(|(name, _)| name.as_str() == key)
            .map(|(_, value)| value.as_str().into_owned())
    }

    #[test]
    fn log_format_parses_case_insensitively() -> Result<()> {
        assert_eq!("json".parse::<LogFormat>()?, LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>()?, LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
        Ok(())
    }

    #[test]
    fn header_pairs_lowercases_and_skips_malformed() {
        assert!(header_pairs("").is_empty());
        assert_eq!(
            header_pairs("X-Tenant = itemkeep ,malformed,=orphan,api-key=a=b"),
            vec![
                ("x-tenant".to_string(), "itemkeep".to_string()),
                ("api-key".to_string(), "a=b".to_string()),
            ]
        );
    }

    #[test]
    fn grpc_metadata_accepts_ascii_and_binary() -> Result<()> {
        let headers = vec![
            ("authorization".to_string(), "Bearer collector".to_string()),
            // "binary data"
            ("trace-bin".to_string(), "YmluYXJ5IGRhdGE=".to_string()),
        ];
        assert_eq!(grpc_metadata(&headers)?.len(), 2);
        Ok(())
    }

    #[test]
    fn grpc_metadata_rejects_bad_base64() {
        let headers = vec![("trace-bin".to_string(), "not base64!!".to_string())];
        let err = grpc_metadata(&headers).err().map(|err| err.to_string());
        assert!(err.is_some_and(|err| err.contains("not base64")));
    }

    #[test]
    fn with_scheme_defaults_to_https() {
        assert_eq!(with_scheme("http://localhost:4317"), "http://localhost:4317");
        assert_eq!(
            with_scheme(" otel.itemkeep.dev:4317/ "),
            "https://otel.itemkeep.dev:4317"
        );
    }

    #[test]
    fn tls_domain_only_for_https() {
        assert_eq!(
            tls_domain("https://otel.itemkeep.dev:4317/v1"),
            Some("otel.itemkeep.dev".to_string())
        );
        assert_eq!(tls_domain("http://localhost:4317"), None);
        assert_eq!(tls_domain("not a url"), None);
    }

    #[test]
    fn otlp_settings_require_endpoint() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", None::<&str>),
                ("OTEL_EXPORTER_OTLP_HEADERS", Some("x-tenant=itemkeep")),
            ],
            || assert_eq!(OtlpSettings::from_env(), None),
        );
    }

    #[test]
    fn otlp_settings_from_env() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("collector:4317")),
                ("OTEL_EXPORTER_OTLP_HEADERS", Some("x-tenant=itemkeep")),
                ("OTEL_SERVICE_INSTANCE_ID", Some("itemkeep-1")),
            ],
            || {
                assert_eq!(
                    OtlpSettings::from_env(),
                    Some(OtlpSettings {
                        endpoint: "https://collector:4317".to_string(),
                        headers: vec![("x-tenant".to_string(), "itemkeep".to_string())],
                        instance_id: "itemkeep-1".to_string(),
                    })
                );
            },
        );
    }

    #[test]
    fn resource_identifies_the_build() {
        let resource = resource("itemkeep-1");
        assert_eq!(
            attribute(&resource, "service.name").as_deref(),
            Some(env!("CARGO_PKG_NAME"))
        );
        assert_eq!(
            attribute(&resource, "service.namespace").as_deref(),
            Some("itemkeep")
        );
        assert_eq!(
            attribute(&resource, "service.instance.id").as_deref(),
            Some("itemkeep-1")
        );
        assert_eq!(
            attribute(&resource, "vcs.revision").as_deref(),
            Some(crate::GIT_COMMIT_HASH)
        );
    }

    #[test]
    fn default_filter_uses_level_without_rust_log() -> Result<()> {
        temp_env::with_var("RUST_LOG", None::<&str>, || -> Result<()> {
            let filter = default_filter(Level::INFO)?.to_string();
            assert!(filter.contains("info"), "{filter}");
            assert!(filter.contains("sqlx=warn"), "{filter}");
            Ok(())
        })
    }

    #[test]
    fn shutdown_tracer_without_provider() {
        shutdown_tracer();
    }
}
