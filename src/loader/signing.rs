// graph_ingest/src/loader/signing.rs
// Request signing for the loader endpoint: SigV4 for IAM-authenticated engines.

use std::time::SystemTime;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{SignableBody, SignableRequest, SigningParams, SigningSettings, sign};
use aws_sigv4::sign::v4;
use reqwest::{Method, RequestBuilder};
use tracing::debug;

use crate::error::{IngestError, Result};

/// Service name the graph engine expects in the SigV4 credential scope.
pub const SIGNING_SERVICE: &str = "neptune-db";

/// Attaches credentials to outgoing loader requests.
///
/// `headers` are the headers the caller has already set and that must be
/// covered by the signature.
#[async_trait]
pub trait RequestSigner: Send + Sync {
    async fn sign(
        &self,
        request: RequestBuilder,
        method: &Method,
        url: &str,
        headers: &[(&str, &str,)],
        body: &[u8],
    ) -> Result<RequestBuilder,>;
}

/// For engines reachable without request signing (local or VPC-internal without IAM auth).
#[derive(Debug, Default, Clone, Copy,)]
pub struct NoopSigner;

#[async_trait]
impl RequestSigner for NoopSigner {
    async fn sign(
        &self,
        request: RequestBuilder,
        _method: &Method,
        _url: &str,
        _headers: &[(&str, &str,)],
        _body: &[u8],
    ) -> Result<RequestBuilder,> {
        Ok(request,)
    }
}

/// Signs every request with AWS SigV4 for `neptune-db` in the configured region.
pub struct SigV4Signer {
    credentials: SharedCredentialsProvider,
    region:      String,
}

impl SigV4Signer {
    pub fn new(credentials: SharedCredentialsProvider, region: impl Into<String,>,) -> Self {
        Self {
            credentials,
            region: region.into(),
        }
    }

    /// Resolves credentials through the standard AWS provider chain
    /// (environment, profile, container or instance role).
    pub async fn from_environment(region: &str,) -> Result<Self,> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest(),)
            .region(aws_config::Region::new(region.to_string(),),)
            .load()
            .await;
        let credentials = config.credentials_provider().ok_or_else(|| {
            IngestError::Configuration(
                "No AWS credentials found; pass --unsigned for engines without IAM auth".to_string(),
            )
        },)?;
        Ok(Self::new(credentials, region,),)
    }

    /// Headers to add so the request carries a valid signature at `time`.
    pub fn signature_headers(
        &self,
        credentials: Credentials,
        method: &Method,
        url: &str,
        headers: &[(&str, &str,)],
        body: &[u8],
        time: SystemTime,
    ) -> Result<Vec<(String, String,),>,> {
        let identity = credentials.into();
        let params: SigningParams<'_,> = v4::SigningParams::builder()
            .identity(&identity,)
            .region(&self.region,)
            .name(SIGNING_SERVICE,)
            .time(time,)
            .settings(SigningSettings::default(),)
            .build()
            .map_err(|e| IngestError::Configuration(format!("Invalid signing parameters: {}", e),),)?
            .into();

        let signable = SignableRequest::new(
            method.as_str(),
            url,
            headers.iter().copied(),
            SignableBody::Bytes(body,),
        )
        .map_err(|e| IngestError::Loader(format!("Request cannot be signed: {}", e),),)?;

        let (instructions, _signature,) = sign(signable, &params,)
            .map_err(|e| IngestError::Loader(format!("Signing failed: {}", e),),)?
            .into_parts();
        Ok(instructions
            .headers()
            .map(|(name, value,)| (name.to_string(), value.to_string(),),)
            .collect(),)
    }
}

#[async_trait]
impl RequestSigner for SigV4Signer {
    async fn sign(
        &self,
        mut request: RequestBuilder,
        method: &Method,
        url: &str,
        headers: &[(&str, &str,)],
        body: &[u8],
    ) -> Result<RequestBuilder,> {
        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .map_err(|e| IngestError::Configuration(format!("Failed to load AWS credentials: {}", e),),)?;
        for (name, value,) in self.signature_headers(credentials, method, url, headers, body, SystemTime::now(),)? {
            request = request.header(name, value,);
        }
        debug!(url, service = SIGNING_SERVICE, region = %self.region, "Signed loader request");
        Ok(request,)
    }
}
