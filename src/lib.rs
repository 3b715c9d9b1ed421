pub mod client;
pub mod codec;
pub mod config;
pub mod flow;
pub mod forms;
pub mod grpc;
pub mod llm;
pub mod media;
pub mod notification;
pub mod server;
pub mod shape;
pub mod shapes;
pub mod storage;
pub mod types;

pub mod rpc {
    pub mod healthassist {
        tonic::include_proto!("healthassist");
    }
}
