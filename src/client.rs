use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tonic::transport::Channel;

use crate::codec::{CodecError, MsgPackCodec, PayloadCodec};
use crate::rpc::healthassist::flow_runner_client::FlowRunnerClient;
use crate::rpc::healthassist::{RunRequest, RunResponse};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to flow runner: {0}")]
    Connect(#[from] tonic::transport::Error),
    #[error("gRPC call failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The flow ran and failed; `kind` is the server's `error_kind`.
    #[error("flow failed ({kind}): {message}")]
    Flow { kind: String, message: String },
}

/// Typed wrapper over the generated `FlowRunner` client.
pub struct FlowRunnerClientWrapper {
    client: FlowRunnerClient<Channel>,
    codec: MsgPackCodec,
}

impl FlowRunnerClientWrapper {
    pub async fn connect(addr: String) -> Result<Self, ClientError> {
        let client = FlowRunnerClient::connect(addr).await?;
        Ok(Self {
            client,
            codec: MsgPackCodec,
        })
    }

    pub async fn run_flow_with_timeout<I, O>(
        &mut self,
        flow_id: &str,
        input: &I,
        timeout: Duration,
    ) -> Result<O, ClientError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let request = self.request(flow_id, input)?;
        let response = tokio::time::timeout(timeout, self.client.run(request))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;
        decode_response(response.into_inner())
    }

    fn request<I: Serialize>(
        &self,
        flow_id: &str,
        input: &I,
    ) -> Result<tonic::Request<RunRequest>, ClientError> {
        Ok(tonic::Request::new(RunRequest {
            flow_id: flow_id.to_string(),
            input: self.codec.encode(input)?,
        }))
    }
}

/// Maps an in-band failure to `ClientError::Flow`, otherwise decodes the output.
fn decode_response<O: DeserializeOwned>(response: RunResponse) -> Result<O, ClientError> {
    let RunResponse {
        output,
        ok,
        error,
        error_kind,
    } = response;
    if !ok {
        return Err(ClientError::Flow {
            kind: error_kind,
            message: error,
        });
    }
    Ok(MsgPackCodec.decode(&output)?)
}
