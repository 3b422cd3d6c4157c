use super::Transport;
use crate::error::DispatchError;
use async_trait::async_trait;
use oxmetrics_common::cipher::Encryptor;
use oxmetrics_common::hashing::Hasher;
use oxmetrics_common::types::Metric;
use oxmetrics_common::{codec, gzip, HASH_HEADER, HASH_METADATA, REAL_IP_HEADER};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use std::net::IpAddr;
use std::sync::Arc;

/// A batch ready for the wire.
#[derive(Debug)]
pub struct Sealed {
    pub body: Vec<u8>,
    /// HMAC of the gzip body, before encryption.
    pub tag: Option<String>,
}

/// JSON batches posted to `/updates/`: gzip, then sign, then encrypt.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    hasher: Hasher,
    encryptor: Option<Arc<Encryptor>>,
    real_ip: Option<IpAddr>,
}

impl HttpTransport {
    pub fn new(
        address: &str,
        hasher: Hasher,
        encryptor: Option<Arc<Encryptor>>,
        real_ip: Option<IpAddr>,
    ) -> Self {
        let base = if address.contains("://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Self {
            client: reqwest::Client::new(),
            url: format!("{base}/updates/"),
            hasher,
            encryptor,
            real_ip,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn seal(&self, metrics: &[Metric]) -> Result<Sealed, DispatchError> {
        let json = codec::encode_batch(metrics)?;
        let packed = gzip::compress(&json).map_err(DispatchError::Compress)?;
        let tag = self.hasher.enabled().then(|| self.hasher.hash(&packed));
        let body = match &self.encryptor {
            Some(encryptor) => encryptor.encrypt(&packed)?,
            None => packed,
        };
        Ok(Sealed { body, tag })
    }

    /// Checks the server's signature over the uncompressed response body.
    fn verify_response(&self, encoding: Option<&str>, tag: Option<&str>, body: &[u8]) -> Result<(), DispatchError> {
        let (true, Some(tag)) = (self.hasher.enabled(), tag) else {
            return Ok(());
        };
        let plain = if encoding.is_some_and(gzip::accepts_gzip) {
            gzip::decompress(body).map_err(DispatchError::Compress)?
        } else {
            body.to_vec()
        };
        if self.hasher.verify(&plain, tag) {
            Ok(())
        } else {
            Err(DispatchError::Integrity)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, metrics: &[Metric]) -> Result<(), DispatchError> {
        let sealed = self.seal(metrics)?;
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(ACCEPT_ENCODING, "gzip");
        if let Some(tag) = &sealed.tag {
            request = request.header(HASH_HEADER, tag);
        }
        if let Some(ip) = self.real_ip {
            request = request.header(REAL_IP_HEADER, ip.to_string());
        }

        let response = request.body(sealed.body).send().await?;
        let status = response.status();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let encoding = header(CONTENT_ENCODING.as_str());
        let tag = header(HASH_METADATA);
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }
        self.verify_response(encoding.as_deref(), tag.as_deref(), &body)?;
        tracing::debug!(count = metrics.len(), url = %self.url, "Batch delivered");
        Ok(())
    }
}
