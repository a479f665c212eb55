//! Provider discovery
//!
//! Providers are configured entirely through environment variables. A
//! provider counts as configured only when all of its required variables
//! are set and non-empty.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use super::error::{BlobError, BlobResult};
use super::provider::{BlobProvider, ObjectStoreProvider};
use crate::config::BlobConfig;

/// Known providers, in selection priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Self-hosted MinIO
    Minio,
    /// Cloudflare R2
    R2,
    /// Backblaze B2
    B2,
    /// Alibaba Cloud OSS
    Oss,
    /// Tencent Cloud COS
    Cos,
    /// Local disk
    Local,
}

impl ProviderKind {
    pub const PRIORITY: [ProviderKind; 6] = [
        ProviderKind::Minio,
        ProviderKind::R2,
        ProviderKind::B2,
        ProviderKind::Oss,
        ProviderKind::Cos,
        ProviderKind::Local,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Minio => "minio",
            ProviderKind::R2 => "r2",
            ProviderKind::B2 => "b2",
            ProviderKind::Oss => "oss",
            ProviderKind::Cos => "cos",
            ProviderKind::Local => "local",
        }
    }

    /// Variables that must all be set; empty for the local provider
    pub fn required_vars(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::Minio => &[
                "MINIO_ENDPOINT",
                "MINIO_ACCESS_KEY",
                "MINIO_SECRET_KEY",
                "MINIO_BUCKET",
            ],
            ProviderKind::R2 => &[
                "R2_ACCOUNT_ID",
                "R2_ACCESS_KEY_ID",
                "R2_SECRET_ACCESS_KEY",
                "R2_BUCKET_NAME",
            ],
            ProviderKind::B2 => &[
                "B2_ENDPOINT",
                "B2_KEY_ID",
                "B2_APPLICATION_KEY",
                "B2_BUCKET_NAME",
            ],
            ProviderKind::Oss => &[
                "OSS_REGION",
                "OSS_ACCESS_KEY_ID",
                "OSS_ACCESS_KEY_SECRET",
                "OSS_BUCKET",
            ],
            ProviderKind::Cos => &["COS_REGION", "COS_SECRET_ID", "COS_SECRET_KEY", "COS_BUCKET"],
            ProviderKind::Local => &[],
        }
    }

    /// Optional variable overriding the generated public URL
    pub fn public_url_var(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Minio => Some("MINIO_PUBLIC_URL"),
            ProviderKind::R2 => Some("R2_PUBLIC_URL"),
            ProviderKind::B2 => Some("B2_PUBLIC_URL"),
            ProviderKind::Oss => Some("OSS_PUBLIC_URL"),
            ProviderKind::Cos => Some("COS_PUBLIC_URL"),
            ProviderKind::Local => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection settings for an S3-compatible service
#[derive(Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Bucket in the host name rather than the path
    pub virtual_hosted: bool,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("virtual_hosted", &self.virtual_hosted)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSettings {
    S3(S3Settings),
    Local { dir: PathBuf },
}

/// A configured provider, ready to be built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub settings: ProviderSettings,
    /// Base URL objects are served from
    pub public_url: String,
}

impl ProviderDescriptor {
    /// Every configured provider, highest priority first
    ///
    /// `lookup` reads a variable; the process environment in production.
    pub fn detect<F>(lookup: F, blob: &BlobConfig) -> Vec<ProviderDescriptor>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        ProviderKind::PRIORITY
            .into_iter()
            .filter_map(|kind| {
                if kind == ProviderKind::Local {
                    return Self::local(blob);
                }
                let values: Vec<String> = kind
                    .required_vars()
                    .iter()
                    .map(|&var| get(var))
                    .collect::<Option<_>>()?;
                let override_url = kind.public_url_var().and_then(|var| get(var));
                Self::s3(kind, values, override_url)
            })
            .collect()
    }

    /// Detect from the process environment
    pub fn from_env(blob: &BlobConfig) -> Vec<ProviderDescriptor> {
        Self::detect(|name| std::env::var(name).ok(), blob)
    }

    fn local(blob: &BlobConfig) -> Option<ProviderDescriptor> {
        let dir = blob.local_dir.clone()?;
        let public_url = blob
            .public_url
            .clone()
            .unwrap_or_else(|| format!("file://{}", dir.display()));
        Some(ProviderDescriptor {
            kind: ProviderKind::Local,
            settings: ProviderSettings::Local { dir },
            public_url,
        })
    }

    /// `values` follows the order of [`ProviderKind::required_vars`]
    fn s3(kind: ProviderKind, values: Vec<String>, override_url: Option<String>) -> Option<Self> {
        let [first, access_key_id, secret_access_key, bucket]: [String; 4] =
            values.try_into().ok()?;
        let trimmed = first.trim_end_matches('/');

        let (endpoint, region, virtual_hosted, public_url) = match kind {
            ProviderKind::Minio => (
                trimmed.to_string(),
                "us-east-1".to_string(),
                false,
                format!("{}/{}", trimmed, bucket),
            ),
            ProviderKind::R2 => {
                let endpoint = format!("https://{}.r2.cloudflarestorage.com", trimmed);
                let public = format!("{}/{}", endpoint, bucket);
                (endpoint, "auto".to_string(), false, public)
            }
            ProviderKind::B2 => (
                trimmed.to_string(),
                b2_region(trimmed),
                false,
                format!("{}/{}", trimmed, bucket),
            ),
            ProviderKind::Oss => {
                let endpoint = format!("https://{}.{}.aliyuncs.com", bucket, trimmed);
                (endpoint.clone(), trimmed.to_string(), true, endpoint)
            }
            ProviderKind::Cos => {
                let endpoint = format!("https://{}.cos.{}.myqcloud.com", bucket, trimmed);
                (endpoint.clone(), trimmed.to_string(), true, endpoint)
            }
            ProviderKind::Local => return None,
        };

        Some(ProviderDescriptor {
            kind,
            settings: ProviderSettings::S3(S3Settings {
                endpoint,
                region,
                bucket,
                access_key_id,
                secret_access_key,
                virtual_hosted,
            }),
            public_url: override_url.unwrap_or(public_url),
        })
    }

    /// Build a client for this provider
    pub fn build(&self) -> BlobResult<Arc<dyn BlobProvider>> {
        match &self.settings {
            ProviderSettings::Local { dir } => Ok(Arc::new(ObjectStoreProvider::local(
                dir,
                Some(self.public_url.clone()),
            )?)),
            ProviderSettings::S3(settings) => self.build_s3(settings),
        }
    }

    #[cfg(feature = "s3")]
    fn build_s3(&self, settings: &S3Settings) -> BlobResult<Arc<dyn BlobProvider>> {
        use object_store::aws::AmazonS3Builder;

        let store = AmazonS3Builder::new()
            .with_endpoint(&settings.endpoint)
            .with_region(&settings.region)
            .with_bucket_name(&settings.bucket)
            .with_access_key_id(&settings.access_key_id)
            .with_secret_access_key(&settings.secret_access_key)
            .with_virtual_hosted_style_request(settings.virtual_hosted)
            .with_allow_http(settings.endpoint.starts_with("http://"))
            .build()
            .map_err(|e| BlobError::InvalidConfig {
                provider: self.kind.name().to_string(),
                details: e.to_string(),
            })?;

        Ok(Arc::new(
            ObjectStoreProvider::new(self.kind.name(), Arc::new(store), &self.public_url)
                .with_content_type(),
        ))
    }

    #[cfg(not(feature = "s3"))]
    fn build_s3(&self, _settings: &S3Settings) -> BlobResult<Arc<dyn BlobProvider>> {
        Err(BlobError::ProviderUnsupported {
            provider: self.kind.name().to_string(),
        })
    }
}

/// B2 endpoints look like `https://s3.<region>.backblazeb2.com`
fn b2_region(endpoint: &str) -> String {
    endpoint
        .split("://")
        .last()
        .and_then(|host| host.split('.').nth(1))
        .filter(|region| !region.is_empty())
        .unwrap_or("us-east-1")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const R2: [(&str, &str); 4] = [
        ("R2_ACCOUNT_ID", "acct"),
        ("R2_ACCESS_KEY_ID", "id"),
        ("R2_SECRET_ACCESS_KEY", "secret"),
        ("R2_BUCKET_NAME", "lofts"),
    ];

    const COS: [(&str, &str); 4] = [
        ("COS_REGION", "ap-guangzhou"),
        ("COS_SECRET_ID", "id"),
        ("COS_SECRET_KEY", "secret"),
        ("COS_BUCKET", "photos-125"),
    ];

    #[test]
    fn test_nothing_configured() {
        assert!(ProviderDescriptor::detect(env(&[]), &BlobConfig::default()).is_empty());
    }

    #[test]
    fn test_partial_config_is_ignored() {
        let found = ProviderDescriptor::detect(
            env(&[("MINIO_ENDPOINT", "http://minio:9000"), ("MINIO_BUCKET", "b")]),
            &BlobConfig::default(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn test_priority_order() {
        let mut pairs: Vec<(&str, &str)> = COS.to_vec();
        pairs.extend_from_slice(&R2);
        let blob = BlobConfig {
            local_dir: Some(PathBuf::from("/srv/uploads")),
            public_url: Some("https://loft.example/uploads".to_string()),
        };

        let kinds: Vec<ProviderKind> = ProviderDescriptor::detect(env(&pairs), &blob)
            .into_iter()
            .map(|d| d.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![ProviderKind::R2, ProviderKind::Cos, ProviderKind::Local]
        );
    }

    #[test]
    fn test_r2_endpoint_and_public_override() {
        let found = ProviderDescriptor::detect(env(&R2), &BlobConfig::default());
        let ProviderSettings::S3(settings) = &found[0].settings else {
            panic!("expected S3 settings");
        };
        assert_eq!(settings.endpoint, "https://acct.r2.cloudflarestorage.com");
        assert_eq!(settings.region, "auto");

        let mut pairs = R2.to_vec();
        pairs.push(("R2_PUBLIC_URL", "https://pub.r2.dev"));
        let found = ProviderDescriptor::detect(env(&pairs), &BlobConfig::default());
        assert_eq!(found[0].public_url, "https://pub.r2.dev");
    }

    #[test]
    fn test_regional_providers_use_virtual_hosts() {
        let found = ProviderDescriptor::detect(env(&COS), &BlobConfig::default());
        let ProviderSettings::S3(settings) = &found[0].settings else {
            panic!("expected S3 settings");
        };
        assert!(settings.virtual_hosted);
        assert_eq!(
            settings.endpoint,
            "https://photos-125.cos.ap-guangzhou.myqcloud.com"
        );
    }

    #[test]
    fn test_b2_region_from_endpoint() {
        assert_eq!(b2_region("https://s3.us-west-004.backblazeb2.com"), "us-west-004");
        assert_eq!(b2_region("garbage"), "us-east-1");
    }

    #[test]
    fn test_debug_hides_secret() {
        let found = ProviderDescriptor::detect(env(&R2), &BlobConfig::default());
        let printed = format!("{:?}", found[0]);
        assert!(!printed.contains("secret\""));
        assert!(printed.contains("<redacted>"));
    }

    #[cfg(not(feature = "s3"))]
    #[test]
    fn test_s3_provider_unsupported_without_feature() {
        let found = ProviderDescriptor::detect(env(&R2), &BlobConfig::default());
        let err = found[0].build().err().unwrap();
        assert!(matches!(err, BlobError::ProviderUnsupported { .. }));
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_s3_provider_builds() {
        let found = ProviderDescriptor::detect(env(&R2), &BlobConfig::default());
        let provider = found[0].build().unwrap();
        assert_eq!(provider.name(), "r2");
        assert_eq!(
            provider.url("a/b.png"),
            "https://acct.r2.cloudflarestorage.com/lofts/a/b.png"
        );
    }
}
