//! Wire objects exchanged between the deployd server and its clients.

pub mod deployment;
pub mod log;

pub use deployment::{
    DeployAccepted, DeploymentRequest, DeploymentStatus, ErrorResponse, HealthResponse,
    StatusResponse,
};
pub use log::{
    CONNECTION_STEP, HEARTBEAT_MESSAGE, HEARTBEAT_STEP, LogEvent, LogLevel, SENTINEL_MESSAGE,
    SYSTEM_STEP,
};
