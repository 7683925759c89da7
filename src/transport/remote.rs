//! Remote object-store backend
//!
//! Speaks a small bucket-style HTTP API:
//! - `HEAD /{bucket}` reachability and credential check
//! - `GET|PUT|HEAD|DELETE /{bucket}/{object}` single objects
//! - `GET /{bucket}?list-type=2&prefix=..` paged JSON listing
//! - `POST /{bucket}?delete` batched deletes

use super::{validate_key, ObjectInfo, Transport, TransportError, TransportResult};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const ENV_ENDPOINT: &str = "OPTIMIZER_REMOTE_ENDPOINT";
pub const ENV_BUCKET: &str = "OPTIMIZER_REMOTE_BUCKET";
pub const ENV_ACCESS_KEY: &str = "OPTIMIZER_REMOTE_ACCESS_KEY";
pub const ENV_SECRET_KEY: &str = "OPTIMIZER_REMOTE_SECRET_KEY";
pub const ENV_REGION: &str = "OPTIMIZER_REMOTE_REGION";
pub const ENV_PREFIX: &str = "OPTIMIZER_REMOTE_PREFIX";

/// Object stores cap batch deletes at 1000 keys per request
const DELETE_BATCH_SIZE: usize = 1000;

/// Connection settings for the remote backend, sourced from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub prefix: String,
    pub timeout: Duration,
}

impl RemoteConfig {
    /// Read the `OPTIMIZER_REMOTE_*` variables from the process environment
    pub fn from_env() -> TransportResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> TransportResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> TransportResult<String> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| TransportError::Config(format!("{} is not set", name)))
        };

        let endpoint = required(ENV_ENDPOINT)?;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(TransportError::Config(format!(
                "{} must be an http(s) URL, got '{}'",
                ENV_ENDPOINT, endpoint
            )));
        }

        let bucket = required(ENV_BUCKET)?;
        if bucket.contains('/') {
            return Err(TransportError::Config(format!(
                "{} must be a bare bucket name, got '{}'",
                ENV_BUCKET, bucket
            )));
        }

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
            access_key: required(ENV_ACCESS_KEY)?,
            secret_key: required(ENV_SECRET_KEY)?,
            region: lookup(ENV_REGION)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "us-east-1".to_string()),
            prefix: lookup(ENV_PREFIX)
                .map(|p| p.trim_matches('/').to_string())
                .unwrap_or_default(),
            timeout: Duration::from_secs(30),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    objects: Vec<ListedObject>,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    key: String,
    size: u64,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    keys: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    deleted: Option<usize>,
}

/// Keys map to object names `{prefix}/{key}` inside the bucket
#[derive(Debug, Clone)]
pub struct RemoteTransport {
    client: Client,
    config: RemoteConfig,
}

impl RemoteTransport {
    /// Build the client and check the bucket; fails on bad credentials or an
    /// unreachable endpoint.
    pub fn connect(config: RemoteConfig) -> TransportResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let transport = Self { client, config };
        transport.check_bucket()?;
        Ok(transport)
    }

    pub fn describe(&self) -> String {
        if self.config.prefix.is_empty() {
            format!("{}/{}", self.config.endpoint, self.config.bucket)
        } else {
            format!("{}/{}/{}", self.config.endpoint, self.config.bucket, self.config.prefix)
        }
    }

    fn check_bucket(&self) -> TransportResult<()> {
        let response = self.authorized(self.client.head(self.bucket_url())).send()?;
        match response.status().as_u16() {
            200..=299 => Ok(()),
            status @ (401 | 403) => Err(TransportError::Config(format!(
                "credentials rejected by {} (HTTP {})",
                self.describe(),
                status
            ))),
            404 => Err(TransportError::Config(format!(
                "bucket '{}' does not exist",
                self.config.bucket
            ))),
            status => Err(TransportError::Config(format!(
                "unexpected HTTP {} probing {}",
                status,
                self.describe()
            ))),
        }
    }

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.config.endpoint, self.config.bucket)
    }

    fn object_name(&self, key: &str) -> String {
        if self.config.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.config.prefix, key)
        }
    }

    fn key_from_object(&self, object: &str) -> Option<String> {
        if self.config.prefix.is_empty() {
            Some(object.to_string())
        } else {
            object
                .strip_prefix(&format!("{}/", self.config.prefix))
                .map(str::to_string)
        }
    }

    fn object_url(&self, key: &str) -> TransportResult<String> {
        validate_key(key)?;
        Ok(format!("{}/{}", self.bucket_url(), self.object_name(key)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth(&self.config.access_key, Some(&self.config.secret_key))
            .header("x-region", &self.config.region)
    }

    fn check(key: &str, response: Response) -> TransportResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound(key.to_string()));
        }
        let message = response.text().unwrap_or_default();
        Err(TransportError::Remote {
            key: key.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}

impl Transport for RemoteTransport {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn get(&self, key: &str) -> TransportResult<Vec<u8>> {
        let url = self.object_url(key)?;
        let response = self.authorized(self.client.get(url)).send()?;
        let response = Self::check(key, response)?;
        Ok(response.bytes()?.to_vec())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> TransportResult<()> {
        let url = self.object_url(key)?;
        let response = self
            .authorized(self.client.put(url))
            .body(bytes.to_vec())
            .send()?;
        Self::check(key, response)?;
        debug!("Uploaded {} bytes to {}", bytes.len(), key);
        Ok(())
    }

    fn exists(&self, key: &str) -> TransportResult<bool> {
        let url = self.object_url(key)?;
        let response = self.authorized(self.client.head(url)).send()?;
        match Self::check(key, response) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list(&self, prefix: &str) -> TransportResult<Vec<ObjectInfo>> {
        let object_prefix = self.object_name(prefix);
        let mut token: Option<String> = None;
        let mut objects = Vec::new();

        loop {
            let mut query = vec![
                ("list-type", "2".to_string()),
                ("prefix", object_prefix.clone()),
            ];
            if let Some(t) = &token {
                query.push(("continuation-token", t.clone()));
            }

            let response = self
                .authorized(self.client.get(self.bucket_url()))
                .query(&query)
                .send()?;
            let page: ListResponse = Self::check(prefix, response)?.json()?;

            objects.extend(page.objects.into_iter().filter_map(|o| {
                self.key_from_object(&o.key).map(|key| ObjectInfo {
                    key,
                    size: o.size,
                    modified: o.last_modified,
                })
            }));

            match page.next_continuation_token {
                Some(t) if !t.is_empty() => token = Some(t),
                _ => break,
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn delete(&self, key: &str) -> TransportResult<()> {
        let url = self.object_url(key)?;
        let response = self.authorized(self.client.delete(url)).send()?;
        match Self::check(key, response) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn delete_many(&self, keys: &[String]) -> TransportResult<usize> {
        let mut deleted = 0;
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let mut names = Vec::with_capacity(chunk.len());
            for key in chunk {
                validate_key(key)?;
                names.push(self.object_name(key));
            }

            let response = self
                .authorized(self.client.post(format!("{}?delete", self.bucket_url())))
                .json(&DeleteRequest { keys: &names })
                .send()?;
            let body: DeleteResponse = Self::check("batch-delete", response)?
                .json()
                .unwrap_or(DeleteResponse { deleted: None });
            deleted += body.deleted.unwrap_or(chunk.len());
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_config_from_lookup() {
        let env = vars(&[
            (ENV_ENDPOINT, "https://store.example.com/"),
            (ENV_BUCKET, "optimizer"),
            (ENV_ACCESS_KEY, "AK"),
            (ENV_SECRET_KEY, "SK"),
            (ENV_PREFIX, "/team-a/"),
        ]);
        let config = RemoteConfig::from_lookup(|k| env.get(k).cloned()).unwrap();

        assert_eq!(config.endpoint, "https://store.example.com");
        assert_eq!(config.bucket, "optimizer");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.prefix, "team-a");
    }

    #[test]
    fn test_config_requires_credentials() {
        let env = vars(&[
            (ENV_ENDPOINT, "https://store.example.com"),
            (ENV_BUCKET, "optimizer"),
        ]);
        let err = RemoteConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains(ENV_ACCESS_KEY));
    }

    #[test]
    fn test_config_rejects_bad_endpoint() {
        let env = vars(&[
            (ENV_ENDPOINT, "store.example.com"),
            (ENV_BUCKET, "optimizer"),
            (ENV_ACCESS_KEY, "AK"),
            (ENV_SECRET_KEY, "SK"),
        ]);
        assert!(RemoteConfig::from_lookup(|k| env.get(k).cloned()).is_err());
    }
}
