mod adapter;
mod backend;
mod gateway;

pub use adapter::StubAdapter;
pub use backend::{FakeConnection, FakeConnector};
pub use gateway::{resolve_path, tokenize_path, PathToken, TestEnvelope, TestGateway, TestInvocation};
