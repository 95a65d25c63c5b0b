use std::sync::Arc;

use mixnet_core::server::MixServer;
use tonic::{Request, Response, Status};

use crate::error::to_status;
use crate::proto::mix_service_server::MixService;
use crate::proto::{
    ForwardMessageRequest, ForwardMessageResponse, PollMessagesRequest, PollMessagesResponse,
    RegisterRequest, RegisterResponse, WaitForStartRequest, WaitForStartResponse,
};

pub struct MixServiceImpl {
    server: Arc<MixServer>,
}

impl MixServiceImpl {
    pub fn new(server: Arc<MixServer>) -> Self {
        Self { server }
    }
}

#[tonic::async_trait]
impl MixService for MixServiceImpl {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        let ok = self
            .server
            .register(&req.client_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(RegisterResponse { ok }))
    }

    async fn wait_for_start(
        &self,
        _request: Request<WaitForStartRequest>,
    ) -> Result<Response<WaitForStartResponse>, Status> {
        let round_duration = self.server.wait_for_start().await;
        Ok(Response::new(WaitForStartResponse {
            ready: true,
            round_duration,
        }))
    }

    async fn forward_message(
        &self,
        request: Request<ForwardMessageRequest>,
    ) -> Result<Response<ForwardMessageResponse>, Status> {
        let req = request.into_inner();
        self.server
            .forward_message(&req.payload, req.round)
            .await
            .map_err(to_status)?;
        Ok(Response::new(ForwardMessageResponse {
            status: "accepted".to_string(),
        }))
    }

    async fn poll_messages(
        &self,
        request: Request<PollMessagesRequest>,
    ) -> Result<Response<PollMessagesResponse>, Status> {
        let req = request.into_inner();
        let payloads = self.server.poll_messages(&req.client_addr).await;
        Ok(Response::new(PollMessagesResponse { payloads }))
    }
}
