// graph_ingest/src/loader/neptune.rs
// HTTP client for the graph engine's `/loader` endpoint.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};
use url::Url;

use super::signing::RequestSigner;
use super::{LoadRequest, LoadSnapshot, LoaderClient, SubmitOutcome};
use crate::error::{IngestError, Result};
use crate::retry::{execute_with_retry, permanent_error, transient_error, wrap_error};

const JSON_HEADERS: [(&str, &str,); 1] = [("content-type", "application/json",)];

pub struct NeptuneLoaderClient {
    client:   Client,
    endpoint: Url,
    signer:   Box<dyn RequestSigner,>,
}

#[derive(Deserialize,)]
struct Envelope {
    payload: Value,
}

/// A submission is only resent when the connection was never established;
/// any later failure may mean the engine already queued the job.
fn submission_error(err: IngestError,) -> backoff::Error<IngestError,> {
    let never_sent = matches!(&err, IngestError::Http(e) if e.is_connect());
    if never_sent {
        transient_error(err,)
    } else {
        warn!(error = %err, "Submission outcome unknown, not resending");
        permanent_error(err,)
    }
}

impl NeptuneLoaderClient {
    pub fn new(endpoint: &str, signer: Box<dyn RequestSigner,>,) -> Result<Self,> {
        let endpoint = Url::parse(endpoint,)
            .map_err(|e| IngestError::Configuration(format!("Invalid loader endpoint: {}", e),),)?;
        if endpoint.cannot_be_a_base() {
            return Err(IngestError::Configuration(format!(
                "Loader endpoint {} cannot carry a path",
                endpoint
            ),),);
        }
        Ok(Self {
            client: Client::new(),
            endpoint,
            signer,
        },)
    }

    /// `{endpoint}/{loadId}` with details and up to 1000 errors on the first page.
    pub fn status_url(&self, load_id: &str,) -> String {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments,) = url.path_segments_mut() {
            segments.pop_if_empty().push(load_id,);
        }
        url.query_pairs_mut()
            .append_pair("details", "true",)
            .append_pair("errors", "true",)
            .append_pair("page", "1",)
            .append_pair("errorsPerPage", "1000",);
        url.to_string()
    }

    /// Transport failures surface as `IngestError::Http` so callers can tell
    /// connect and timeout failures apart from everything else.
    async fn send(&self, method: Method, url: &str, body: Option<Vec<u8,>,>,) -> Result<(u16, String,),> {
        let bytes = body.unwrap_or_default();
        let mut request = self.client.request(method.clone(), url,);
        for (name, value,) in JSON_HEADERS {
            request = request.header(name, value,);
        }
        if !bytes.is_empty() {
            request = request.body(bytes.clone(),);
        }
        let request = self
            .signer
            .sign(request, &method, url, &JSON_HEADERS, &bytes,)
            .await?;
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok((status, text,),)
    }
}

#[async_trait]
impl LoaderClient for NeptuneLoaderClient {
    async fn start_load(&self, request: &LoadRequest,) -> Result<SubmitOutcome,> {
        let body = serde_json::to_vec(request,)?;
        info!(source = %request.source, endpoint = %self.endpoint, "Submitting bulk load");

        let (status, text,) = execute_with_retry(|| async {
            self.send(Method::POST, self.endpoint.as_str(), Some(body.clone(),),)
                .await
                .map_err(submission_error,)
        },)
        .await?;

        if !(200..300).contains(&status,) {
            error!(status, body = %text, "Loader rejected submission");
            return Ok(SubmitOutcome::Rejected { status, body: text, },);
        }

        let envelope: Envelope = serde_json::from_str(&text,)?;
        let load_id = envelope
            .payload
            .get("loadId",)
            .and_then(Value::as_str,)
            .ok_or_else(|| IngestError::Loader(format!("Loader response has no loadId: {}", text),),)?
            .to_string();
        Ok(SubmitOutcome::Accepted { load_id, },)
    }

    async fn load_status(&self, load_id: &str,) -> Result<LoadSnapshot,> {
        let url = self.status_url(load_id,);
        let (status, text,) = execute_with_retry(|| async {
            match self.send(Method::GET, &url, None,).await {
                Ok((status, text,),) if status >= 500 || status == 429 => {
                    Err(wrap_error(IngestError::Loader(format!(
                        "Loader status {} (service unavailable): {}",
                        status, text
                    ),),),)
                },
                Ok(response,) => Ok(response,),
                Err(e,) => Err(wrap_error(e,),),
            }
        },)
        .await?;

        if !(200..300).contains(&status,) {
            return Err(IngestError::Loader(format!(
                "Status request for {} failed with {}: {}",
                load_id, status, text
            ),),);
        }
        let envelope: Envelope = serde_json::from_str(&text,)?;
        Ok(LoadSnapshot::from_payload(envelope.payload,),)
    }
}
