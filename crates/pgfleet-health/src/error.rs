use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("probe timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("probe connection failed: {0}")]
    ConnectFailed(String),
}
