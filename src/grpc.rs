use serde_json::Value;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::codec::{MsgPackCodec, PayloadCodec};
use crate::flow::FlowRegistry;
use crate::rpc::healthassist::flow_runner_server::{FlowRunner, FlowRunnerServer};
use crate::rpc::healthassist::{RunRequest, RunResponse};

/// `healthassist.FlowRunner` over the shared flow registry.
///
/// Flow failures are answered in-band (`ok = false` plus `error_kind`);
/// only transport problems surface as gRPC status codes.
pub struct FlowRunnerService {
    codec: MsgPackCodec,
    flows: FlowRegistry,
}

impl FlowRunnerService {
    pub fn new(flows: FlowRegistry) -> Self {
        Self {
            codec: MsgPackCodec,
            flows,
        }
    }

    pub fn into_server(self) -> FlowRunnerServer<Self> {
        FlowRunnerServer::new(self)
    }

    fn failure(kind: &str, error: impl ToString) -> RunResponse {
        RunResponse {
            output: Vec::new(),
            ok: false,
            error: error.to_string(),
            error_kind: kind.to_string(),
        }
    }
}

#[tonic::async_trait]
impl FlowRunner for FlowRunnerService {
    async fn run(&self, request: Request<RunRequest>) -> Result<Response<RunResponse>, Status> {
        let RunRequest { flow_id, input } = request.into_inner();
        debug!(flow = %flow_id, input_bytes = input.len(), "grpc run");

        let input: Value = match self.codec.decode(&input) {
            Ok(value) => value,
            Err(e) => {
                warn!(flow = %flow_id, "undecodable grpc input: {e}");
                return Ok(Response::new(Self::failure("codec", e)));
            }
        };

        let output = match self.flows.run(&flow_id, input).await {
            Ok(output) => output,
            Err(e) => return Ok(Response::new(Self::failure(e.kind(), e))),
        };

        let output = self
            .codec
            .encode(&output)
            .map_err(|e| Status::internal(format!("encode output failed: {e}")))?;

        Ok(Response::new(RunResponse {
            output,
            ok: true,
            error: String::new(),
            error_kind: String::new(),
        }))
    }
}
