/// Errors surfaced by the deployment lifecycle (§6).
#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error("workflow already deployed: {0}")]
    AlreadyDeployed(String),

    #[error("workflow not deployed: {0}")]
    NotDeployed(String),

    #[error("cron scheduling failed: {0}")]
    Cron(String),
}
